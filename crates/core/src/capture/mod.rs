pub mod capture_photo_use_case;
