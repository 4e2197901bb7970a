//! Data source port: where raw point-in-time records come from.

use crate::domain::error::AlphasimError;
use crate::domain::market_data::RawRecord;
use crate::domain::universe::InstrumentId;
use chrono::NaiveDate;

pub trait DataPort {
    /// Records for `instruments` observed within `[start_date, end_date]`,
    /// restricted to `fields`. Revisions of the same row are all returned.
    fn fetch_history(
        &self,
        instruments: &[InstrumentId],
        start_date: NaiveDate,
        end_date: NaiveDate,
        fields: &[String],
    ) -> Result<Vec<RawRecord>, AlphasimError>;

    fn list_instruments(&self) -> Result<Vec<InstrumentId>, AlphasimError>;

    /// First date, last date and row count for an instrument.
    fn data_range(
        &self,
        instrument: &InstrumentId,
    ) -> Result<Option<(NaiveDate, NaiveDate, usize)>, AlphasimError>;
}
