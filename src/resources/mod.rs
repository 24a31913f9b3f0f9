/*!
 * Resources Module
 * Homeostatic (self-repairing) tracking of every descriptor the process
 * owns
 */

mod faults;
mod homeostat;
mod table;
pub mod types;

pub use faults::{cleanup_shadows, install_fault_handler};
pub use table::ResourceTable;
pub use types::{
    shadow_path_for, Homeostat, Hooks, LocateHook, MigrateHook, RepairHook, ResourceError,
    ResourceInfo, ResourceResult, SpacePolicy,
};
