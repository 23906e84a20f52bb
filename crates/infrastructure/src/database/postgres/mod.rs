mod postgres_upload_session_repository;
mod postgres_usage_repository;

pub use postgres_upload_session_repository::PostgresUploadSessionRepository;
pub use postgres_usage_repository::PostgresUsageRepository;
