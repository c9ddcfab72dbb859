pub mod app;
pub mod components;

pub use app::ConsoleApp;
