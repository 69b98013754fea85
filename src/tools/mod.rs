pub mod batch;
pub mod bulk_unlock;
pub mod prompt;
pub mod unlock;
