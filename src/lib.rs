pub mod cache;
pub mod codec;
pub mod config;
pub mod errors;
pub mod executor;
pub mod gateway;
pub mod history;
pub mod orchestrator;
pub mod prompts;
pub mod protocol;

pub use codec::{Action, ActionKind};
pub use config::{load_config, AppConfig};
pub use errors::{PilotError, PilotResult};
pub use executor::ScreenExecutor;
pub use gateway::{Gateway, GatewayConfig};
pub use history::HistoryManager;
pub use orchestrator::Orchestrator;
