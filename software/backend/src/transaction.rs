// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Filename: <transaction.rs>

//! Weigh tickets and the document sent to the transaction store.
//!
//! A truck crosses the bridge twice. Each crossing captures the current
//! scale reading; the net weight is the absolute difference, so it does not
//! matter whether the truck came in loaded or empty.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cell::WeightSnapshot;
use crate::error::TicketError;
use crate::frame::WeightReading;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleInfo {
    pub vehicle_number: String,
    pub driver_name: String,
    pub material: String,
    pub company: String,
    pub notes: String,
}

#[derive(Debug, Clone, Default)]
pub struct WeighTicket {
    pub vehicle: VehicleInfo,
    first_weight: Option<WeightReading>,
    second_weight: Option<WeightReading>,
    net_weight: Option<WeightReading>,
}

impl WeighTicket {
    pub fn new(vehicle: VehicleInfo) -> Self {
        Self {
            vehicle,
            ..Default::default()
        }
    }

    pub fn first_weight(&self) -> Option<WeightReading> {
        self.first_weight
    }

    pub fn second_weight(&self) -> Option<WeightReading> {
        self.second_weight
    }

    pub fn net_weight(&self) -> Option<WeightReading> {
        self.net_weight
    }

    pub fn record_first(&mut self, snapshot: &WeightSnapshot) -> Result<WeightReading, TicketError> {
        let reading = capture(snapshot)?;
        self.first_weight = Some(reading);
        Ok(reading)
    }

    /// Net weight is only computed when a first weight is already on the
    /// ticket; without one the ticket stays unsaveable.
    pub fn record_second(&mut self, snapshot: &WeightSnapshot) -> Result<WeightReading, TicketError> {
        let reading = capture(snapshot)?;
        self.second_weight = Some(reading);
        if let Some(first) = self.first_weight {
            self.net_weight = Some(reading.abs_diff(&first));
        }
        Ok(reading)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn to_document(&self, timestamp: DateTime<Utc>) -> Result<TransactionDocument, TicketError> {
        if self.vehicle.vehicle_number.trim().is_empty() {
            return Err(TicketError::Incomplete("vehicle number is required"));
        }
        let (Some(first), Some(second), Some(net)) =
            (self.first_weight, self.second_weight, self.net_weight)
        else {
            return Err(TicketError::Incomplete("both weights must be recorded"));
        };

        Ok(TransactionDocument {
            id: None,
            first_weight: first,
            second_weight: second,
            net_weight: net,
            vehicle_no: self.vehicle.vehicle_number.clone(),
            driver_name: self.vehicle.driver_name.clone(),
            company_name: self.vehicle.company.clone(),
            material: self.vehicle.material.clone(),
            note: self.vehicle.notes.clone(),
            timestamp,
        })
    }
}

fn capture(snapshot: &WeightSnapshot) -> Result<WeightReading, TicketError> {
    snapshot
        .as_reading()
        .ok_or_else(|| TicketError::NoReading(snapshot.weight_text()))
}

/// Body accepted by the transaction store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransactionDocument {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub first_weight: WeightReading,
    pub second_weight: WeightReading,
    pub net_weight: WeightReading,
    pub vehicle_no: String,
    pub driver_name: String,
    pub company_name: String,
    pub material: String,
    pub note: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PersistRequest {
    Create(TransactionDocument),
    Update { id: i64, document: TransactionDocument },
}

impl PersistRequest {
    pub fn create(document: TransactionDocument) -> Self {
        PersistRequest::Create(document)
    }

    pub fn update(id: i64, mut document: TransactionDocument) -> Self {
        document.id = Some(id);
        PersistRequest::Update { id, document }
    }

    pub fn method(&self) -> &'static str {
        match self {
            PersistRequest::Create(_) => "POST",
            PersistRequest::Update { .. } => "PUT",
        }
    }

    pub fn document(&self) -> &TransactionDocument {
        match self {
            PersistRequest::Create(document) | PersistRequest::Update { document, .. } => document,
        }
    }

    pub fn body(&self) -> serde_json::Result<String> {
        serde_json::to_string(self.document())
    }
}
