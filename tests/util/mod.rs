use std::sync::Once;

static INIT: Once = Once::new();

/// Install a logger exactly once per process, so `RUST_LOG=trace cargo test
/// -- --nocapture` shows dispatcher tracing without every test racing to
/// initialize it.
pub fn init() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}
