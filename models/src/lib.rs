pub mod dashboard;
pub mod device;
pub mod scan;
pub mod user;
