pub mod models;
pub mod pg_repository;
pub mod report;
pub mod repositories;
