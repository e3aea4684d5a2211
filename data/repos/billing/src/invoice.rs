pub struct Invoice {
    pub id: String,
    pub amount_cents: u64,
}

pub fn total(invoices: &[Invoice]) -> u64 {
    invoices.iter().map(|i| i.amount_cents).sum()
}
