//! Shared record types: timestamps, orders, line items and status enums
use std::fmt;

use chrono::{DateTime, Utc};

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
pub struct TimeStamp(DateTime<Utc>);

impl TimeStamp {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp {
    fn default() -> Self {
        Self::new()
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(value: DateTime<Utc>) -> Self {
        TimeStamp(value)
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl<C> minicbor::Encode<C> for TimeStamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Paid,
    #[n(2)]
    Shipped,
    #[n(3)]
    Delivered,
    #[n(4)]
    Cancelled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One product line, used both on orders and on return requests.
/// `unit_price` is in minor currency units.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct LineItem {
    #[n(0)]
    pub product_id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub size: Option<String>,
    #[n(3)]
    pub quantity: u32,
    #[n(4)]
    pub unit_price: u64,
}

/// Snapshot of an order as held by the storefront catalog. Read only here.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Order {
    #[n(0)]
    pub order_number: String,
    #[n(1)]
    pub customer_email: String,
    #[n(2)]
    pub customer_name: String,
    #[n(3)]
    pub status: OrderStatus,
    #[n(4)]
    pub items: Vec<LineItem>,
    #[n(5)]
    pub total: u64,
    #[n(6)]
    pub order_date: TimeStamp,
    #[n(7)]
    pub delivered_date: Option<TimeStamp>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnKind {
    #[n(0)]
    Return,
    #[n(1)]
    Exchange,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    #[n(0)]
    StoreCredit,
    #[n(1)]
    Refund,
    #[n(2)]
    PhysicalExchange,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnStatus {
    #[n(0)]
    Pending,
    #[n(1)]
    Approved,
    #[n(2)]
    Completed,
    #[n(3)]
    Rejected,
    #[n(4)]
    Cancelled,
}

impl ReturnStatus {
    pub const ALL: [ReturnStatus; 5] = [
        ReturnStatus::Pending,
        ReturnStatus::Approved,
        ReturnStatus::Completed,
        ReturnStatus::Rejected,
        ReturnStatus::Cancelled,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ReturnStatus::Completed | ReturnStatus::Rejected | ReturnStatus::Cancelled
        )
    }
}

impl fmt::Display for ReturnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReturnStatus::Pending => "pending",
            ReturnStatus::Approved => "approved",
            ReturnStatus::Completed => "completed",
            ReturnStatus::Rejected => "rejected",
            ReturnStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CouponStatus {
    #[n(0)]
    Active,
    #[n(1)]
    Used,
    #[n(2)]
    Cancelled,
}

impl fmt::Display for CouponStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CouponStatus::Active => "active",
            CouponStatus::Used => "used",
            CouponStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}
