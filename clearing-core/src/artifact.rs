//! Settlement artifact generation
//!
//! Renders the structured export of a cycle's final positions as the
//! settlement file handed to the rendering/signing collaborator.
//!
//! # Example Output
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <SettlementFile xmlns="http://bancario.switch/settlement/v1">
//!   <Header>
//!     <MsgId>MSG-LIQ-1717000000000</MsgId>
//!     <CycleId>100</CycleId>
//!     <CreationDate>2026-08-30T12:00:00Z</CreationDate>
//!     <TotalRecords>2</TotalRecords>
//!   </Header>
//!   <Transactions>
//!     <Tx>
//!       <BankBIC>BANKA</BankBIC>
//!       <NetPosition currency="USD">-80.00</NetPosition>
//!       <Action>PAY</Action>
//!     </Tx>
//!   </Transactions>
//! </SettlementFile>
//! ```

use crate::error::{ClearingError, Result};
use crate::types::{Cycle, Position};
use chrono::{DateTime, Utc};
use quick_xml::se::to_string as to_xml_string;
use rust_decimal::Decimal;
use serde::Serialize;

const SETTLEMENT_NAMESPACE: &str = "http://bancario.switch/settlement/v1";

#[derive(Debug, Serialize)]
#[serde(rename = "SettlementFile")]
struct SettlementFileXml {
    #[serde(rename = "@xmlns")]
    xmlns: String,
    #[serde(rename = "Header")]
    header: HeaderXml,
    #[serde(rename = "Transactions")]
    transactions: TransactionsXml,
}

#[derive(Debug, Serialize)]
struct HeaderXml {
    #[serde(rename = "MsgId")]
    msg_id: String,
    #[serde(rename = "CycleId")]
    cycle_id: i64,
    #[serde(rename = "CreationDate")]
    creation_date: DateTime<Utc>,
    #[serde(rename = "TotalRecords")]
    total_records: usize,
}

#[derive(Debug, Serialize)]
struct TransactionsXml {
    #[serde(rename = "Tx")]
    transactions: Vec<TxXml>,
}

#[derive(Debug, Serialize)]
struct TxXml {
    #[serde(rename = "BankBIC")]
    bank_bic: String,
    #[serde(rename = "NetPosition")]
    net_position: NetPositionXml,
    #[serde(rename = "Action")]
    action: String,
}

#[derive(Debug, Serialize)]
struct NetPositionXml {
    #[serde(rename = "@currency")]
    currency: String,
    #[serde(rename = "$text")]
    value: Decimal,
}

/// Settlement file generator
pub struct SettlementFileGenerator {
    /// Currency attribute stamped on each net position
    currency: String,
}

impl SettlementFileGenerator {
    /// Create new generator
    pub fn new(currency: impl Into<String>) -> Self {
        Self {
            currency: currency.into(),
        }
    }

    /// Render the settlement file for a closing cycle. Returns the file
    /// name and the XML document.
    pub fn generate(
        &self,
        cycle: &Cycle,
        positions: &[Position],
        generated_at: DateTime<Utc>,
    ) -> Result<(String, String)> {
        let document = SettlementFileXml {
            xmlns: SETTLEMENT_NAMESPACE.to_string(),
            header: HeaderXml {
                msg_id: format!("MSG-LIQ-{}", generated_at.timestamp_millis()),
                cycle_id: cycle.sequence,
                creation_date: generated_at,
                total_records: positions.len(),
            },
            transactions: TransactionsXml {
                transactions: positions
                    .iter()
                    .map(|position| TxXml {
                        bank_bic: position.bic.as_str().to_string(),
                        net_position: NetPositionXml {
                            currency: self.currency.clone(),
                            value: position.net,
                        },
                        action: action_for(position.net).to_string(),
                    })
                    .collect(),
            },
        };

        let body = to_xml_string(&document)
            .map_err(|e| ClearingError::Serialization(e.to_string()))?;
        let xml = format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}", body);
        let file_name = format!("LIQ_CICLO_{}.xml", cycle.sequence);

        Ok((file_name, xml))
    }
}

/// A participant with a non-negative net receives funds; a negative net pays
fn action_for(net: Decimal) -> &'static str {
    if net >= Decimal::ZERO {
        "RECEIVE"
    } else {
        "PAY"
    }
}
