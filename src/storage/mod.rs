pub mod node_table;
pub mod node_tuple_table;
pub mod tuple_table;
pub mod util;
pub mod indexing {
    pub mod hash_index;
    pub mod permutation;
    pub mod tuple_index;
}
