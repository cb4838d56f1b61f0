//! Boot loader configuration files

pub mod kernel;
pub mod lilo_conf;
