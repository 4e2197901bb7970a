//! Trading calendar port.

use crate::domain::error::AlphasimError;
use chrono::NaiveDate;

pub trait CalendarPort {
    /// Every valid trading date, in increasing order.
    fn trading_days(&self) -> Result<Vec<NaiveDate>, AlphasimError>;
}
