//! Orders: the snapshot model, its state machine and the lifecycle manager
//! that owns every transition.

pub mod error;
pub mod events;
pub mod manager;
pub mod model;

pub use error::{LifecycleError, LifecycleResult};
pub use events::{LoggingObserver, OrderEventBus, OrderObserver};
pub use manager::{OrderLifecycleManager, Transition};
pub use model::{Address, LineItem, NewOrder, Order, OrderStatus, StatusChange};
