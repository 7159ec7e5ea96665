use std::process;

fn main() {
    if let Err(e) = gantry::cli::run() {
        gantry::ui::error(&format!("{:#}", e));
        process::exit(1);
    }
}
