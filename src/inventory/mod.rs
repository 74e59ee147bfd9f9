//! Inventory valuation and stock tracking
//!
//! Stock quantities live per (warehouse, product) in base units. Every
//! change appends an immutable [`InventoryMovement`] audit row carrying the
//! balance after the change. Products carry a running weighted-average cost
//! per base unit, read by the posting orchestrators for COGS and written by
//! inbound stock (purchase posting, adjustments) outside this core.

use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::*;

/// A sellable unit of measure attached to a product, with its conversion
/// factor into the product's base (smallest) unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductUnit {
    pub unit_id: EntityId,
    /// Multiplier from this unit to base units (e.g. carton of 12 → 12)
    pub conversion_factor: BigDecimal,
}

/// A stocked product with its costing basis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Storage-assigned id (0 until saved)
    pub id: EntityId,
    pub name: String,
    /// VAT percentage applied on sale (0–100)
    pub vat_rate: BigDecimal,
    /// Running cost per base unit; the posting orchestrator reads this
    /// before mutating stock so COGS reflects the pre-sale basis
    pub weighted_average_cost: BigDecimal,
    pub units: Vec<ProductUnit>,
    pub is_active: bool,
}

impl Product {
    pub fn new(
        name: impl Into<String>,
        vat_rate: BigDecimal,
        initial_cost: BigDecimal,
        units: Vec<ProductUnit>,
    ) -> PostingResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PostingError::Validation(
                "product name cannot be empty".to_string(),
            ));
        }
        let zero = BigDecimal::from(0);
        if vat_rate < zero || vat_rate > BigDecimal::from(100) {
            return Err(PostingError::Validation(
                "VAT rate must be between 0 and 100".to_string(),
            ));
        }
        if initial_cost < zero {
            return Err(PostingError::Validation(
                "initial cost cannot be negative".to_string(),
            ));
        }
        Ok(Self {
            id: 0,
            name: name.trim().to_string(),
            vat_rate,
            weighted_average_cost: round_quantity(&initial_cost),
            units,
            is_active: true,
        })
    }

    /// Conversion factor for one of this product's units.
    pub fn conversion_factor(&self, unit_id: EntityId) -> Option<&BigDecimal> {
        self.units
            .iter()
            .find(|u| u.unit_id == unit_id)
            .map(|u| &u.conversion_factor)
    }

    /// Recomputes the weighted-average cost when stock arrives at a new
    /// price. Called by inbound flows (purchase posting, adjustments); the
    /// sales orchestrators only ever read the value.
    pub fn receive_stock_at_cost(
        &mut self,
        existing_quantity: &BigDecimal,
        received_quantity: &BigDecimal,
        unit_cost: &BigDecimal,
    ) -> PostingResult<()> {
        let zero = BigDecimal::from(0);
        if *received_quantity <= zero {
            return Err(PostingError::Validation(
                "received quantity must be greater than zero".to_string(),
            ));
        }
        if *unit_cost < zero {
            return Err(PostingError::Validation(
                "unit cost cannot be negative".to_string(),
            ));
        }

        if *existing_quantity <= zero {
            self.weighted_average_cost = round_quantity(unit_cost);
            return Ok(());
        }

        let existing_value = existing_quantity * &self.weighted_average_cost;
        let received_value = received_quantity * unit_cost;
        let total_quantity = existing_quantity + received_quantity;
        self.weighted_average_cost =
            round_quantity(&((existing_value + received_value) / total_quantity));
        Ok(())
    }
}

/// Stock balance of one product in one warehouse, in base units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseStock {
    /// Storage-assigned id (0 until saved)
    pub id: EntityId,
    pub warehouse_id: EntityId,
    pub product_id: EntityId,
    pub quantity: BigDecimal,
}

impl WarehouseStock {
    pub fn new(warehouse_id: EntityId, product_id: EntityId) -> Self {
        Self {
            id: 0,
            warehouse_id,
            product_id,
            quantity: BigDecimal::from(0),
        }
    }

    /// Increases stock (purchase receipt, sales return, transfer in).
    pub fn increase(&mut self, quantity: &BigDecimal) -> PostingResult<()> {
        if *quantity <= BigDecimal::from(0) {
            return Err(PostingError::Validation(
                "stock increase must be greater than zero".to_string(),
            ));
        }
        self.quantity += quantity;
        Ok(())
    }

    /// Decreases stock. Refuses to go below zero, citing the shortfall.
    pub fn decrease(&mut self, quantity: &BigDecimal) -> PostingResult<()> {
        if *quantity <= BigDecimal::from(0) {
            return Err(PostingError::Validation(
                "stock decrease must be greater than zero".to_string(),
            ));
        }
        if self.quantity < *quantity {
            return Err(PostingError::Precondition(format!(
                "insufficient stock: available {}, required {}",
                self.quantity, quantity
            )));
        }
        self.quantity -= quantity;
        Ok(())
    }
}

/// Append-only audit row for one stock change.
///
/// Movements are never edited or deleted; reversals append an opposite
/// movement instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryMovement {
    /// Storage-assigned id (0 until saved)
    pub id: EntityId,
    pub product_id: EntityId,
    pub warehouse_id: EntityId,
    pub unit_id: EntityId,
    pub movement_type: MovementType,
    /// Quantity in the transaction unit
    pub quantity: BigDecimal,
    /// Quantity converted to base units
    pub base_quantity: BigDecimal,
    /// Cost per base unit at the time of movement
    pub unit_cost: BigDecimal,
    /// `base_quantity` × `unit_cost`, rounded to 4 places
    pub total_cost: BigDecimal,
    pub date: NaiveDate,
    /// Originating document number
    pub reference_number: String,
    pub source_type: SourceType,
    pub source_id: Option<EntityId>,
    /// Warehouse-product balance right after this movement applied
    pub balance_after: BigDecimal,
    pub notes: Option<String>,
}

impl InventoryMovement {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        product_id: EntityId,
        warehouse_id: EntityId,
        unit_id: EntityId,
        movement_type: MovementType,
        quantity: BigDecimal,
        base_quantity: BigDecimal,
        unit_cost: BigDecimal,
        total_cost: BigDecimal,
        date: NaiveDate,
        reference_number: impl Into<String>,
        source_type: SourceType,
        source_id: Option<EntityId>,
        notes: Option<String>,
    ) -> PostingResult<Self> {
        let zero = BigDecimal::from(0);
        if quantity <= zero || base_quantity <= zero {
            return Err(PostingError::Validation(
                "movement quantities must be greater than zero".to_string(),
            ));
        }
        if unit_cost < zero {
            return Err(PostingError::Validation(
                "movement unit cost cannot be negative".to_string(),
            ));
        }
        let reference_number = reference_number.into();
        if reference_number.trim().is_empty() {
            return Err(PostingError::Validation(
                "movement reference number is required".to_string(),
            ));
        }

        Ok(Self {
            id: 0,
            product_id,
            warehouse_id,
            unit_id,
            movement_type,
            quantity,
            base_quantity,
            unit_cost,
            total_cost,
            date,
            reference_number: reference_number.trim().to_string(),
            source_type,
            source_id,
            balance_after: BigDecimal::from(0),
            notes: notes.map(|n| n.trim().to_string()),
        })
    }

    /// Records the post-mutation balance snapshot. Set by the orchestrator
    /// after the warehouse stock row has been updated.
    pub fn set_balance_after(&mut self, balance_after: BigDecimal) -> PostingResult<()> {
        if balance_after < BigDecimal::from(0) {
            return Err(PostingError::Validation(
                "balance after a movement cannot be negative".to_string(),
            ));
        }
        self.balance_after = balance_after;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qty(v: i64) -> BigDecimal {
        BigDecimal::from(v)
    }

    #[test]
    fn stock_decrease_refuses_shortfall() {
        let mut stock = WarehouseStock::new(1, 1);
        stock.increase(&qty(10)).unwrap();

        let err = stock.decrease(&qty(12)).unwrap_err();
        match err {
            PostingError::Precondition(msg) => {
                assert!(msg.contains("available 10"));
                assert!(msg.contains("required 12"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        stock.decrease(&qty(8)).unwrap();
        assert_eq!(stock.quantity, qty(2));
    }

    #[test]
    fn wac_blends_inbound_cost() {
        let mut product = Product::new("Widget", qty(0), qty(10), vec![]).unwrap();

        // 10 on hand at 10.0000; receive 10 more at 20.0000 → 15.0000
        product
            .receive_stock_at_cost(&qty(10), &qty(10), &qty(20))
            .unwrap();
        assert_eq!(product.weighted_average_cost, round_quantity(&qty(15)));

        // empty stock resets the basis to the inbound cost
        product
            .receive_stock_at_cost(&qty(0), &qty(5), &qty(7))
            .unwrap();
        assert_eq!(product.weighted_average_cost, round_quantity(&qty(7)));
    }

    #[test]
    fn movement_requires_reference_and_positive_quantities() {
        let date = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap();
        assert!(InventoryMovement::new(
            1,
            1,
            1,
            MovementType::SalesOut,
            qty(0),
            qty(0),
            qty(5),
            qty(0),
            date,
            "SI-2026-0001",
            SourceType::SalesInvoice,
            Some(1),
            None,
        )
        .is_err());

        let mut movement = InventoryMovement::new(
            1,
            1,
            1,
            MovementType::SalesOut,
            qty(2),
            qty(2),
            qty(5),
            qty(10),
            date,
            "SI-2026-0001",
            SourceType::SalesInvoice,
            Some(1),
            None,
        )
        .unwrap();

        assert!(movement.set_balance_after(qty(-1)).is_err());
        movement.set_balance_after(qty(8)).unwrap();
        assert_eq!(movement.balance_after, qty(8));
    }
}
