pub mod advisor;
pub mod bridge;
pub mod models;
pub mod onboarding;
pub mod remote;
pub mod storage;
pub mod store;
