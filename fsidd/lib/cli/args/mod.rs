mod fsidctl;
mod fsidd;

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use fsidctl::*;
pub use fsidd::*;
