use std::backtrace::{Backtrace, BacktraceStatus};
use std::panic::PanicHookInfo;

/// Routes panics through `tracing` before running the previously installed hook.
pub(crate) fn install() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log_panic(info);
        previous(info);
    }));
}

fn log_panic(info: &PanicHookInfo) {
    let backtrace = Backtrace::capture();
    let (backtrace, note) = match backtrace.status() {
        BacktraceStatus::Captured => (Some(backtrace), None),
        BacktraceStatus::Disabled => (None, Some("set RUST_BACKTRACE=1 to capture a backtrace")),
        _ => (None, Some("backtrace unavailable")),
    };

    let payload = info
        .payload()
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| info.payload().downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload");

    tracing::error!(
        critical = true,
        panic.payload = payload,
        panic.location = info.location().map(|location| location.to_string()),
        panic.backtrace = backtrace.map(tracing::field::display),
        panic.note = note,
        "a panic occurred",
    );
}
