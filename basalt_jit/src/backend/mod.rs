//! Native code backends. Only x86-64 is supported.

pub mod x64;
