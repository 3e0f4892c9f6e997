//! Database entities for the checkout subsystem

pub mod event;
pub mod folder;
pub mod order;
pub mod order_item;
pub mod photo;
pub mod price_list_item;
pub mod subject;

pub use event::Entity as Event;
pub use folder::Entity as Folder;
pub use order::{Entity as Order, OrderStatus};
pub use order_item::Entity as OrderItem;
pub use photo::Entity as Photo;
pub use price_list_item::Entity as PriceListItem;
pub use subject::Entity as Subject;
