pub(crate) mod gradings;
