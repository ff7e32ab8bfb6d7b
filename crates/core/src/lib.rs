pub mod capture;
pub mod detection;
pub mod segmentation;
pub mod shared;
