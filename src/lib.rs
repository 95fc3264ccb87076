pub mod cli;
pub mod clip;
pub mod config;
pub mod feature;
pub mod mercator;
pub mod merge;
pub mod sink;
pub mod source;
pub mod stitch;
pub mod validate;
