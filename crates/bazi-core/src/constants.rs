/// Year 4 CE opened a 甲子 year; year stems and branches count from here.
pub const YEAR_ANCHOR: i32 = 4;

/// Day pillars are counted from 1900-01-01, a 甲戌 day.
pub const DAY_ANCHOR: (i32, u32, u32) = (1900, 1, 1);

/// Sexagenary index of the day anchor (甲戌).
pub const DAY_ANCHOR_INDEX: u8 = 10;

/// Last calendar year accepted by the calculator.
pub const MAX_SUPPORTED_YEAR: i32 = 2100;

/// February day on which the sexagenary year turns over (立春 approximation).
pub const SPRING_BOUNDARY_DAY: u32 = 4;

/// Standard meridian of UTC+8, in degrees east.
pub const STANDARD_MERIDIAN_DEG: f64 = 120.0;

/// Clock minutes gained per degree east of the standard meridian.
pub const MINUTES_PER_DEGREE: f64 = 4.0;

pub const MINUTES_PER_DAY: f64 = 1440.0;

/// Calling-layer defaults for absent birth time and longitude (Beijing).
pub const DEFAULT_BIRTH_TIME: &str = "12:30";
pub const DEFAULT_LONGITUDE: f64 = 116.40;
