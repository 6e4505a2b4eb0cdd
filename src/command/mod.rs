mod check_config;
mod publish_once;
mod run;

pub use check_config::check_config;
pub use publish_once::publish_once;
pub use run::run;
