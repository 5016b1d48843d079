pub mod convert;
pub mod encode;
pub mod pump;
pub mod shared;
