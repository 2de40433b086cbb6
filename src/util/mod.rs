pub mod adf;
pub mod fan_out;
pub mod html;
