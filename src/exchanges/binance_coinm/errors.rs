use crate::core::errors::{ErrorCategory, ErrorCodeTable};

/// COIN-M error codes worth telling apart. Anything else is `Unknown`
/// (or `Server` on a 5xx).
pub static BINANCE_COINM_ERROR_CODES: ErrorCodeTable = ErrorCodeTable::new(&[
    (-1000, ErrorCategory::Server),
    (-1001, ErrorCategory::Server),
    (-1002, ErrorCategory::Authentication),
    (-1003, ErrorCategory::RateLimit),
    (-1006, ErrorCategory::Server),
    (-1007, ErrorCategory::Server),
    (-1008, ErrorCategory::Server),
    (-1015, ErrorCategory::RateLimit),
    (-1016, ErrorCategory::Server),
    (-1021, ErrorCategory::Timestamp),
    (-1022, ErrorCategory::Authentication),
    (-1100, ErrorCategory::InvalidParameter),
    (-1101, ErrorCategory::InvalidParameter),
    (-1102, ErrorCategory::InvalidParameter),
    (-1103, ErrorCategory::InvalidParameter),
    (-1104, ErrorCategory::InvalidParameter),
    (-1105, ErrorCategory::InvalidParameter),
    (-1106, ErrorCategory::InvalidParameter),
    (-1111, ErrorCategory::InvalidParameter),
    (-1116, ErrorCategory::InvalidParameter),
    (-1117, ErrorCategory::InvalidParameter),
    (-1121, ErrorCategory::InvalidParameter),
    (-1130, ErrorCategory::InvalidParameter),
    (-2010, ErrorCategory::OrderRejected),
    (-2011, ErrorCategory::OrderRejected),
    (-2013, ErrorCategory::OrderNotFound),
    (-2014, ErrorCategory::Authentication),
    (-2015, ErrorCategory::Authentication),
    (-2019, ErrorCategory::OrderRejected),
    (-2021, ErrorCategory::OrderRejected),
    (-2022, ErrorCategory::OrderRejected),
    (-4046, ErrorCategory::PositionConflict),
    (-4047, ErrorCategory::PositionConflict),
    (-4048, ErrorCategory::PositionConflict),
    (-4059, ErrorCategory::PositionConflict),
    (-4061, ErrorCategory::PositionConflict),
    (-4068, ErrorCategory::PositionConflict),
]);
