use std::sync::Once;

static INIT: Once = Once::new();

/// Route `log` output through env_logger for the current test binary.
/// Run with `RUST_LOG=chain_dict=trace` to see rehash and bucket activity.
pub fn init_logger() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}
