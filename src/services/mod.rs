mod chargeback;

pub use chargeback::ChargebackService;
