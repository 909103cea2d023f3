//! Per-test log capture.
//!
//! Tests run in parallel, so logging straight to the console interleaves the events of every test
//! running at the time.  Instead each test gets its own subscriber writing into a buffer, which is
//! printed when the test finishes (or panics).
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

/// Log filter used when `RUST_LOG` isn't set
const DEFAULT_FILTER: &str = "h2=warn,hyper=info,rustls=info,aws=info,s3cat=trace,debug";

/// Collects the formatted log events of one test
#[derive(Clone, Default)]
struct CapturedLog {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLog {
    /// Take everything logged so far.  Panics if non-UTF8 text was logged.
    fn drain(&self) -> String {
        let buffer = std::mem::take(&mut *self.buffer.lock().unwrap());

        String::from_utf8(buffer).unwrap()
    }
}

impl<'a> Write for &'a CapturedLog {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLog {
    type Writer = &'a Self;

    fn make_writer(&'a self) -> Self::Writer {
        self
    }
}

/// Run an async test with its own tokio runtime and its own log capture.
///
/// Use this in place of `#[tokio::test]`.  Every worker thread of the runtime is set up to log to
/// this test's subscriber, so events from spawned tasks (part uploads, for instance) are captured
/// along with the rest.  The captured log is printed after the test, whether it passed, failed or
/// panicked.
pub fn test_with_logging(test: impl Future<Output = Result<()>>) -> Result<()> {
    let log = CapturedLog::default();

    let dispatch = {
        use tracing_subscriber::prelude::*;
        use tracing_subscriber::{fmt, EnvFilter};

        let format = fmt::layer()
            .with_level(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(false)
            .with_writer(log.clone());

        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(DEFAULT_FILTER))?;

        Arc::new(tracing::Dispatch::new(
            tracing_subscriber::registry().with(filter).with(format),
        ))
    };

    tracing::dispatcher::with_default(&dispatch, || {
        std::thread_local! {
            static WORKER_DISPATCH: RefCell<Option<tracing::subscriber::DefaultGuard>> = RefCell::new(None);
        }

        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder.enable_all();
        {
            let dispatch = dispatch.clone();
            builder.on_thread_start(move || {
                WORKER_DISPATCH.with(|cell| {
                    cell.replace(Some(tracing::dispatcher::set_default(&dispatch)));
                })
            });
        }
        builder.on_thread_stop(|| {
            WORKER_DISPATCH.with(|cell| cell.replace(None));
        });

        let runtime = builder.build()?;

        // Neither the runtime nor arbitrary test futures promise to be unwind safe, but the panic
        // is re-thrown below so nothing observes the broken state
        let outcome = std::panic::catch_unwind(AssertUnwindSafe(move || {
            let result = runtime.block_on(test);
            runtime.shutdown_timeout(Duration::from_secs(10));

            result
        }));

        println!("Log events from this test: \n{}", log.drain());

        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    })
}
