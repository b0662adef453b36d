pub mod approval;
pub mod decision;
pub mod executor;
pub mod factory;
pub mod services;
pub mod storage;
