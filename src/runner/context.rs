//! Run contexts
//!
//! A [`RunContext`] accompanies every task and job invocation. It carries the
//! inherited variables, a logger, a cancellation token and a one-shot result
//! cell. Contexts form a tree:
//!
//! - [`RunContext::fork`] shares the cancellation token, so cancelling either
//!   side cancels both.
//! - [`RunContext::child_context`] gets a child token: the parent's
//!   cancellation reaches it, but cancelling it leaves the parent alone.
//!
//! Each context reports its result once. Later reports are ignored and never
//! release the shared [`WaitGroup`] a second time.

use crate::error::{ExecutionError, ExecutionResult};
use crate::logging::Logger;
use crate::scope::Vars;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Notify};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Counter of in-flight dispatches
#[derive(Debug, Default)]
pub struct WaitGroup {
    count: AtomicUsize,
    notify: Notify,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one more dispatch
    pub fn add(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }

    /// Release one dispatch
    pub fn done(&self) {
        match self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| c.checked_sub(1))
        {
            Ok(1) => self.notify.notify_waiters(),
            Ok(_) => {}
            Err(_) => warn!("wait group released more times than it was registered"),
        }
    }

    /// Number of dispatches still running
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Wait until every registered dispatch is released
    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Single-assignment result slot shared by the clones of one context
#[derive(Debug)]
struct ResultCell {
    sender: Mutex<Option<oneshot::Sender<ExecutionResult<()>>>>,
    receiver: Mutex<Option<oneshot::Receiver<ExecutionResult<()>>>>,
    finished: AtomicBool,
    registered: AtomicBool,
}

impl ResultCell {
    fn new() -> Arc<Self> {
        let (sender, receiver) = oneshot::channel();
        Arc::new(ResultCell {
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            finished: AtomicBool::new(false),
            registered: AtomicBool::new(false),
        })
    }
}

/// The consuming side of a context's result
#[derive(Debug)]
pub struct ResultWaiter {
    receiver: oneshot::Receiver<ExecutionResult<()>>,
}

impl ResultWaiter {
    /// Wait for the result
    ///
    /// If every clone of the context is dropped without reporting, the result
    /// is [`ExecutionError::ResultAbandoned`].
    pub async fn wait(self) -> ExecutionResult<()> {
        self.receiver
            .await
            .unwrap_or(Err(ExecutionError::ResultAbandoned))
    }
}

/// Execution context of one task or job invocation
#[derive(Debug, Clone)]
pub struct RunContext {
    root_vars: Arc<Vars>,
    logger: Logger,
    token: CancellationToken,
    cell: Arc<ResultCell>,
    wait_group: Arc<WaitGroup>,
    task_stack: Arc<Vec<String>>,
    child: bool,
}

impl RunContext {
    /// Create a root context
    pub fn new(root_vars: Vars, logger: Logger, token: CancellationToken) -> Self {
        RunContext {
            root_vars: Arc::new(root_vars),
            logger,
            token,
            cell: ResultCell::new(),
            wait_group: Arc::new(WaitGroup::new()),
            task_stack: Arc::new(Vec::new()),
            child: false,
        }
    }

    /// Use a shared wait group
    pub fn with_wait_group(mut self, wait_group: Arc<WaitGroup>) -> Self {
        self.wait_group = wait_group;
        self
    }

    /// Same context with extra root variables layered on top
    pub fn with_vars(mut self, vars: &Vars) -> Self {
        if vars.is_empty() {
            return self;
        }
        let mut merged = (*self.root_vars).clone();
        merged.extend(vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.root_vars = Arc::new(merged);
        self
    }

    /// Same context with a task pushed onto the task stack
    pub fn with_task(mut self, task_name: &str) -> Self {
        let mut stack = (*self.task_stack).clone();
        stack.push(task_name.to_string());
        self.task_stack = Arc::new(stack);
        self
    }

    /// Context sharing this one's cancellation token and wait group
    pub fn fork(&self) -> Self {
        RunContext {
            root_vars: self.root_vars.clone(),
            logger: self.logger.sub_logger(),
            token: self.token.clone(),
            cell: ResultCell::new(),
            wait_group: self.wait_group.clone(),
            task_stack: self.task_stack.clone(),
            child: true,
        }
    }

    /// Context with its own cancellation scope nested under this one
    pub fn child_context(&self) -> Self {
        RunContext {
            root_vars: self.root_vars.clone(),
            logger: self.logger.sub_logger(),
            token: self.token.child_token(),
            cell: ResultCell::new(),
            wait_group: self.wait_group.clone(),
            task_stack: self.task_stack.clone(),
            child: true,
        }
    }

    /// Child context that cancels itself once `timeout` elapses
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let ctx = RunContext {
            logger: self.logger.clone(),
            ..self.child_context()
        };

        let token = ctx.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => token.cancel(),
                _ = token.cancelled() => {}
            }
        });

        ctx
    }

    /// Variables inherited by this context
    pub fn root_vars(&self) -> &Vars {
        &self.root_vars
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Cancellation token of this context
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn wait_group(&self) -> &Arc<WaitGroup> {
        &self.wait_group
    }

    /// Whether this context was derived from another one
    pub fn is_child(&self) -> bool {
        self.child
    }

    /// Tasks currently being executed, outermost first
    pub fn task_stack(&self) -> &[String] {
        &self.task_stack
    }

    /// Check if a task is being executed in this context (detects recursion)
    pub fn is_task_in_stack(&self, task_name: &str) -> bool {
        self.task_stack.iter().any(|t| t == task_name)
    }

    /// Cancel this context and everything derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the context is cancelled
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Register this context's dispatch on the wait group
    pub fn register(&self) {
        if !self.cell.registered.swap(true, Ordering::SeqCst) {
            self.wait_group.add();
        }
    }

    /// Report success
    pub fn success(&self) {
        self.result(Ok(()));
    }

    /// Report the job result; only the first report has any effect
    pub fn result(&self, result: ExecutionResult<()>) {
        let Some(sender) = self.cell.sender.lock().take() else {
            self.logger.debug("result already reported, ignoring");
            return;
        };

        self.cell.finished.store(true, Ordering::SeqCst);
        if sender.send(result).is_err() {
            self.logger.debug("result reported with nobody waiting");
        }

        if self.cell.registered.load(Ordering::SeqCst) {
            self.wait_group.done();
        }
    }

    /// Whether the result is still outstanding
    pub fn is_alive(&self) -> bool {
        !self.cell.finished.load(Ordering::SeqCst)
    }

    /// Take the consuming side of the result; possible once per context
    pub fn waiter(&self) -> ExecutionResult<ResultWaiter> {
        self.cell
            .receiver
            .lock()
            .take()
            .map(|receiver| ResultWaiter { receiver })
            .ok_or(ExecutionError::ResultAlreadyObserved)
    }

    /// Wait for the result reported through this context
    pub async fn wait(&self) -> ExecutionResult<()> {
        self.waiter()?.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> RunContext {
        RunContext::new(Vars::new(), Logger::root(), CancellationToken::new())
    }

    #[tokio::test]
    async fn test_result_is_one_shot() {
        let ctx = root();
        ctx.register();
        assert_eq!(ctx.wait_group().count(), 1);
        assert!(ctx.is_alive());

        ctx.result(Err(ExecutionError::CommandFailed(Some(3))));
        ctx.success();
        ctx.result(Err(ExecutionError::Cancelled));

        assert!(!ctx.is_alive());
        assert_eq!(ctx.wait_group().count(), 0);
        assert!(matches!(
            ctx.wait().await,
            Err(ExecutionError::CommandFailed(Some(3)))
        ));
    }

    #[tokio::test]
    async fn test_redundant_results_do_not_release_siblings() {
        let ctx = root();
        let first = ctx.child_context();
        let second = ctx.child_context();
        first.register();
        second.register();
        assert_eq!(ctx.wait_group().count(), 2);

        first.success();
        first.success();
        first.result(Err(ExecutionError::Cancelled));
        assert_eq!(ctx.wait_group().count(), 1);

        second.success();
        assert_eq!(ctx.wait_group().count(), 0);
    }

    #[tokio::test]
    async fn test_result_is_observed_once() {
        let ctx = root();
        ctx.success();
        assert!(ctx.wait().await.is_ok());
        assert!(matches!(
            ctx.wait().await,
            Err(ExecutionError::ResultAlreadyObserved)
        ));
    }

    #[tokio::test]
    async fn test_dropped_context_abandons_result() {
        let ctx = root().child_context();
        let waiter = ctx.waiter().unwrap();
        drop(ctx);
        assert!(matches!(
            waiter.wait().await,
            Err(ExecutionError::ResultAbandoned)
        ));
    }

    #[tokio::test]
    async fn test_result_crosses_tasks() {
        let ctx = root().child_context();
        let waiter = ctx.waiter().unwrap();
        ctx.register();

        let handle = tokio::spawn(async move {
            ctx.success();
        });

        assert!(waiter.wait().await.is_ok());
        handle.await.unwrap();
    }

    #[test]
    fn test_child_cancel_does_not_reach_parent() {
        let parent = root();
        let child = parent.child_context();
        let grandchild = child.child_context();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_parent_cancel_reaches_descendants() {
        let parent = root();
        let child = parent.child_context();
        let forked = child.fork();
        let grandchild = forked.child_context();

        parent.cancel();
        assert!(child.is_cancelled());
        assert!(forked.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn test_fork_shares_cancellation_both_ways() {
        let parent = root();
        let job = parent.child_context();
        let forked = job.fork();

        assert!(forked.is_child());
        forked.cancel();
        assert!(job.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_derived_contexts_log_under_parent_span() {
        use tracing_subscriber::registry::LookupSpan;

        tracing::subscriber::with_default(tracing_subscriber::registry(), || {
            let parent = RunContext::new(
                Vars::new(),
                Logger::for_run("build"),
                CancellationToken::new(),
            );
            let parent_id = parent.logger().span().id();

            for derived in [parent.fork(), parent.child_context()] {
                assert_eq!(derived.logger().depth(), parent.logger().depth() + 1);

                let id = derived.logger().span().id().unwrap();
                assert_ne!(Some(id.clone()), parent_id);
                let enclosing = tracing::dispatcher::get_default(|dispatch| {
                    let registry = dispatch.downcast_ref::<tracing_subscriber::Registry>()?;
                    registry.span(&id)?.parent().map(|span| span.id())
                });
                assert_eq!(enclosing, parent_id);
            }
        });
    }

    #[test]
    fn test_fork_has_its_own_result() {
        let ctx = root();
        let forked = ctx.fork();
        forked.success();
        assert!(!forked.is_alive());
        assert!(ctx.is_alive());
        assert!(Arc::ptr_eq(ctx.wait_group(), forked.wait_group()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_cancels_after_deadline() {
        let parent = root();
        let timed = parent.with_timeout(Duration::from_millis(200));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!timed.is_cancelled());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(timed.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_vars_and_task_stack() {
        let mut vars = Vars::new();
        vars.insert("a".to_string(), "1".to_string());
        let ctx = root().with_vars(&vars).with_task("build");

        let mut more = Vars::new();
        more.insert("a".to_string(), "2".to_string());
        let nested = ctx.fork().with_vars(&more).with_task("lint");

        assert_eq!(ctx.root_vars()["a"], "1");
        assert_eq!(nested.root_vars()["a"], "2");
        assert!(nested.is_task_in_stack("build"));
        assert!(nested.is_task_in_stack("lint"));
        assert!(!ctx.is_task_in_stack("lint"));
        assert_eq!(nested.task_stack(), ["build", "lint"]);
    }

    #[tokio::test]
    async fn test_wait_group_wait() {
        let wait_group = Arc::new(WaitGroup::new());
        wait_group.add();
        wait_group.add();

        let waiter = {
            let wait_group = wait_group.clone();
            tokio::spawn(async move { wait_group.wait().await })
        };

        wait_group.done();
        wait_group.done();
        waiter.await.unwrap();
        assert_eq!(wait_group.count(), 0);
    }
}
