//! Common test utilities for integration tests.
//!
//! Provides helpers to drive an [`RtnlHandler`] until a condition holds and
//! to run a test body inside a fresh network namespace.

use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use nlroute::RtnlHandler;
use nlroute::netlink::HandlerConfig;

/// How long to wait for kernel replies before giving up.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Check if running as root.
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// Skip the test if not running as root.
#[macro_export]
macro_rules! require_root {
    () => {
        if !crate::common::is_root() {
            eprintln!("Skipping test: requires root");
            return;
        }
    };
}

/// A handler bound to `groups`, or `None` if no socket can be opened here
/// (for example in a sandbox without netlink).
pub fn start_handler(groups: u32) -> Option<Rc<RtnlHandler>> {
    let handler = Rc::new(RtnlHandler::new(HandlerConfig::new()));
    match handler.start(groups) {
        Ok(()) => Some(handler),
        Err(e) => {
            eprintln!("Skipping test: cannot open rtnetlink socket: {}", e);
            None
        }
    }
}

/// Process socket traffic until `done` returns true or [`TIMEOUT`] expires.
///
/// Returns whether `done` became true.
pub async fn drive_until(handler: &RtnlHandler, done: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while !done() {
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::select! {
            res = handler.try_run() => {
                if let Err(e) = res {
                    panic!("rtnetlink socket read failed: {}", e);
                }
                return done();
            }
            _ = tokio::time::sleep(Duration::from_millis(20)) => {}
        }
    }
    true
}

/// Run `test` on a current-thread runtime inside a new network namespace.
///
/// The namespace belongs to a dedicated thread, so the rest of the test
/// binary keeps its own. It starts with only a downed `lo`.
pub fn in_new_netns<F, Fut>(test: F)
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = ()>,
{
    let thread = std::thread::spawn(move || {
        // SAFETY: CLONE_NEWNET only detaches this thread's network namespace;
        // no memory is shared with the call.
        if unsafe { libc::unshare(libc::CLONE_NEWNET) } != 0 {
            panic!(
                "unshare(CLONE_NEWNET) failed: {}",
                std::io::Error::last_os_error()
            );
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        runtime.block_on(test());
    });

    if let Err(panic) = thread.join() {
        std::panic::resume_unwind(panic);
    }
}
