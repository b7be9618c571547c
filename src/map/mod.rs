// 高度图模块：副本存储、派生几何、脏矩形同步、包围盒与一致性

pub mod bounds;
pub mod consistency;
pub mod dimensions;
pub mod observer;
pub mod pipeline;
pub mod read_map;
pub mod rect;
pub mod store;
pub mod update_queue;
pub mod visibility;

pub use bounds::{BoundsTracker, HeightBounds};
pub use consistency::{heightmap_checksum, typemap_checksum, TerrainType};
pub use dimensions::{MapDimensions, SQUARE_SIZE};
pub use observer::{HeightMapObserver, ObserverId};
pub use pipeline::UpdateRects;
pub use read_map::{MapSource, ReadMap};
pub use rect::Rect;
pub use store::{HeightFieldStore, ReplicaMode};
pub use update_queue::UpdateQueue;
pub use visibility::{DirectReplication, GatedReplication, Replication, Visibility};
