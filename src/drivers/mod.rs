pub mod flash;
pub mod icm42688;
pub mod spl06;
pub mod tmp102;
