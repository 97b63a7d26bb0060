//! An iterative DNS resolver: queries arrive over UDP and are answered by
//! walking the delegation chain down from the root servers.

pub mod dns;
