//! Per-test log capture.
//!
//! Tests run in parallel, so with a global subscriber the log output of every test is mixed
//! together.  Here each test gets its own `tracing` dispatcher and its own tokio runtime whose
//! threads all use that dispatcher, and the captured output is printed once the test is over.
use crate::Result;
use std::{
    cell::RefCell,
    future::Future,
    io::Write,
    panic::AssertUnwindSafe,
    sync::{Arc, Mutex},
    time::Duration,
};
use tracing_subscriber::fmt::MakeWriter;

/// Log filter used when `RUST_LOG` isn't set.  The HTTP and AWS stacks are very chatty at debug.
const DEFAULT_FILTER: &str = "h2=warn,hyper=info,hyper_util=info,rustls=info,reqwest=info,aws=info,debug";

/// Buffer that collects the formatted log events of one test
#[derive(Clone, Default)]
struct CapturedLogs {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    /// Take everything logged so far, leaving the buffer empty
    fn drain(&self) -> String {
        let bytes = std::mem::take(&mut *self.buffer.lock().unwrap());

        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl<'a> Write for &'a CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = &'a Self;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

fn make_dispatch(logs: CapturedLogs) -> Result<tracing::Dispatch> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{fmt, EnvFilter};

    let format = fmt::layer()
        .with_level(true)
        .with_target(true)
        // Tests often run several upload workers at once, so thread IDs help tell them apart
        .with_thread_ids(true)
        .with_thread_names(false)
        .with_writer(logs);

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(DEFAULT_FILTER)?,
    };

    Ok(tracing::Dispatch::new(
        tracing_subscriber::registry().with(filter).with(format),
    ))
}

thread_local! {
    static RUNTIME_THREAD_DISPATCH: RefCell<Option<tracing::subscriber::DefaultGuard>> = RefCell::new(None);
}

/// A multi-threaded runtime whose worker (and blocking) threads all log to `dispatch`
fn make_runtime(dispatch: Arc<tracing::Dispatch>) -> Result<tokio::runtime::Runtime> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .on_thread_start(move || {
            let guard = tracing::dispatcher::set_default(&dispatch);

            RUNTIME_THREAD_DISPATCH.with(|cell| cell.replace(Some(guard)));
        })
        .on_thread_stop(|| {
            RUNTIME_THREAD_DISPATCH.with(|cell| cell.replace(None));
        })
        .build()?;

    Ok(runtime)
}

/// Run an async test with its own runtime and its own log capture.
///
/// Use this in place of `#[tokio::test]`:
///
/// ```ignore
/// #[test]
/// fn uploads_something() -> artifacts_testing::Result<()> {
///     artifacts_testing::logging::test_with_logging(async move {
///         // ...
///         Ok(())
///     })
/// }
/// ```
///
/// Everything logged while the test runs, including from tasks spawned on the runtime and from
/// blocking threads, is printed when the test finishes, whether it passed, failed, or panicked.
pub fn test_with_logging(test: impl Future<Output = Result<()>>) -> Result<()> {
    let logs = CapturedLogs::default();
    let dispatch = Arc::new(make_dispatch(logs.clone())?);

    let outcome = tracing::dispatcher::with_default(&dispatch, || {
        let runtime = make_runtime(dispatch.clone())?;

        // Tokio runtimes are fine to move across an unwind boundary, and requiring every test
        // future to be `UnwindSafe` isn't practical
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(move || {
            let result = runtime.block_on(test);
            runtime.shutdown_timeout(Duration::from_secs(10));

            result
        }));

        Result::<_>::Ok(outcome)
    })?;

    println!("Log events from this test:\n{}", logs.drain());

    match outcome {
        Ok(result) => result,
        Err(panic) => std::panic::resume_unwind(panic),
    }
}
