pub mod carts;
pub mod categories;
pub mod loyalty;
pub mod media;
pub mod orders;
pub mod payments;
pub mod products;
pub mod settings;
pub mod vendors;
pub mod wishlist;
