pub mod service;

pub use service::XpService;
