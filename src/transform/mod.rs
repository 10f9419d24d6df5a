//! Domain validation and MX resolution.

mod lookup;
mod resolver;

pub use lookup::{
    parse_target, system_nameservers, HickoryFactory, HickoryLookup, LookupFactory, LookupFailure,
    MxLookup,
};
pub use resolver::DomainResolver;
