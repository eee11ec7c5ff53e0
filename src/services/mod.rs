pub mod catalog;
pub mod confirm;
pub mod dispatcher;
pub mod journal;
pub mod scanner;
pub mod stacking;
pub mod upload;

pub use catalog::{CatalogClient, MemoryCatalog};
pub use dispatcher::GroupDispatcher;
pub use journal::{EventJournal, Journal};
pub use scanner::ScannerService;
pub use stacking::StackWorkflow;
pub use upload::UploadRunner;
