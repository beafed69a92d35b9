pub(crate) mod batch;
pub(crate) mod dispatcher;
pub(crate) mod grading;
