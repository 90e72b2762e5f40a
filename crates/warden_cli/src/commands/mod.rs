pub(crate) mod analyze;
pub(crate) mod collect;
pub(crate) mod list;
pub(crate) mod meta;
pub(crate) mod scopes;
pub(crate) mod shared;
