// Entity Models
// "Identity persists, values change"
//
// Each entity has:
// - Stable identity (store-assigned id) that NEVER changes
// - Descriptive values overwritten by later submissions

pub mod office;
pub mod owner;

pub use office::{EfinEnrollment, OfficeEntity};
pub use owner::{OwnerEfinAssociation, OwnerEntity, OwnerRole};
