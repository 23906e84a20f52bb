pub mod postgres;

use jobd_core::JobdError;

pub(crate) fn db_err(err: sqlx::Error) -> JobdError {
    JobdError::Database(err.to_string())
}
