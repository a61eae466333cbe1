// Library module for testable functions

pub mod sources;
pub mod store;
pub mod valuation;

/// Calculate price per square foot
pub fn price_per_sqft(price: i64, square_feet: i32) -> Option<f64> {
    if price <= 0 || square_feet <= 0 {
        return None;
    }
    Some(price as f64 / square_feet as f64)
}
