// ABOUTME: Library side of the codebox command line host
// ABOUTME: Startup wiring, console task observer and table/summary formatting

pub mod app;
pub mod format;
pub mod observer;

pub use app::{
    exit_code, init_logging, load_config, open_store, start_service, start_service_with,
    FeatureUnavailable, StartMode, EXIT_FAILURE, EXIT_UNAVAILABLE,
};
pub use observer::ConsoleObserver;
