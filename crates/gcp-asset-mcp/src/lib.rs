pub mod asset_inventory;
pub mod config;
pub mod logging;
pub mod server;

pub use asset_inventory::AssetInventoryRouter;
