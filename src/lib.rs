pub mod config;
pub mod datecodec;
pub mod engine;
pub mod error;
pub mod provider;
pub mod reconciler;
pub mod store;
pub mod token;
pub mod xml;

/// Initialize `tracing-subscriber` once, honoring `RUST_LOG`. Safe to call
/// more than once; later calls are no-ops.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    });
}
