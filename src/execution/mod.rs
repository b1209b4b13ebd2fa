//! Execution operators that correlate rows through a [`HashTable`].
mod hash_table;
mod join;

pub use hash_table::HashTable;
pub use join::{collect_rows, intersect_keys, BoxRowStream, HashJoin, HashNest, RowStream, VecRowStream};
