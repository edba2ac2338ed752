pub mod content_handlers;
pub mod generate_handlers;
pub mod health_handlers;
