//! Billing provider adapters. Each adapter owns its wire format and
//! signature scheme; the core only ever sees `BillingEvent`s.

mod razorpay;
mod stripe;

pub use razorpay::{RazorpayConfig, RazorpayProvider};
pub use stripe::{StripeConfig, StripeMeterReporter, StripeProvider};
