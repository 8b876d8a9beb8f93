use fnv::FnvHashMap;

/// One basket: the (neighbor, value) pairs contributed by a single shared node.
pub type Basket = Vec<(u32, f64)>;

/// Baskets travel to the accumulation pool in bounded chunks.
pub type BasketChunk = Vec<Basket>;

/// Inner map of a shard: higher pair id to accumulated statistics.
pub type PairRow<S> = FnvHashMap<u32, S>;

/// Outer map of a shard: lower pair id to its row of partners.
pub type PairTable<S> = FnvHashMap<u32, PairRow<S>>;

/// Neighbor lists keyed by row id, in the order they were written.
pub type NeighborLists = FnvHashMap<u32, Vec<(u32, f64)>>;
