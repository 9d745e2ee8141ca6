//! Thin CRUD wrappers over the domain endpoints.
//!
//! Records are passed through as JSON; the views own their shape.

use serde_json::{json, Value};

use crate::models::{ListQuery, Page};

use super::error::Result;
use super::gateway::{Gateway, RequestContext};

/// A REST collection under `/api`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Products,
    Inventory,
    InventoryTransactions,
    InventoryAlerts,
    Members,
    Purchases,
    PurchaseReceivings,
    Suppliers,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Products,
        ResourceKind::Inventory,
        ResourceKind::InventoryTransactions,
        ResourceKind::InventoryAlerts,
        ResourceKind::Members,
        ResourceKind::Purchases,
        ResourceKind::PurchaseReceivings,
        ResourceKind::Suppliers,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            ResourceKind::Products => "/api/products",
            ResourceKind::Inventory => "/api/inventory",
            ResourceKind::InventoryTransactions => "/api/inventory-transactions",
            ResourceKind::InventoryAlerts => "/api/inventory-alerts",
            ResourceKind::Members => "/api/members",
            ResourceKind::Purchases => "/api/purchases",
            ResourceKind::PurchaseReceivings => "/api/purchase-receivings",
            ResourceKind::Suppliers => "/api/suppliers",
        }
    }

    /// Name used on the command line, e.g. `inventory-alerts`.
    pub fn name(&self) -> &'static str {
        self.path().trim_start_matches("/api/")
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

#[derive(Clone)]
pub struct Resource {
    gateway: Gateway,
    kind: ResourceKind,
}

impl Resource {
    pub fn new(gateway: Gateway, kind: ResourceKind) -> Self {
        Self { gateway, kind }
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    fn item_path(&self, id: u64) -> String {
        format!("{}/{}", self.kind.path(), id)
    }

    pub async fn list(&self, query: &ListQuery, context: &RequestContext) -> Result<Page<Value>> {
        self.gateway
            .get_with_query(self.kind.path(), query.to_pairs(), context)
            .await
    }

    pub async fn get(&self, id: u64, context: &RequestContext) -> Result<Value> {
        self.gateway.get(&self.item_path(id), context).await
    }

    pub async fn create(&self, body: &Value, context: &RequestContext) -> Result<Value> {
        self.gateway.post(self.kind.path(), body, context).await
    }

    pub async fn update(&self, id: u64, body: &Value, context: &RequestContext) -> Result<Value> {
        self.gateway.put(&self.item_path(id), body, context).await
    }

    pub async fn delete(&self, id: u64, context: &RequestContext) -> Result<Value> {
        self.gateway.delete(&self.item_path(id), context).await
    }
}

/// Endpoints beyond plain CRUD.
#[derive(Clone)]
pub struct Operations {
    gateway: Gateway,
}

impl Operations {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }

    pub async fn update_alert_status(&self, id: u64, status: &str, context: &RequestContext) -> Result<Value> {
        let path = format!("{}/{}/status", ResourceKind::InventoryAlerts.path(), id);
        self.gateway.put(&path, &json!({ "status": status }), context).await
    }

    /// Ask the server to re-evaluate stock levels against thresholds.
    pub async fn check_inventory_levels(&self, context: &RequestContext) -> Result<Value> {
        let path = format!("{}/check", ResourceKind::InventoryAlerts.path());
        self.gateway.post(&path, &Value::Null, context).await
    }

    pub async fn update_purchase_status(
        &self,
        id: u64,
        status: &str,
        note: &str,
        context: &RequestContext,
    ) -> Result<Value> {
        let path = format!("{}/{}/status", ResourceKind::Purchases.path(), id);
        self.gateway
            .put(&path, &json!({ "status": status, "note": note }), context)
            .await
    }

    pub async fn member_points(&self, member_id: u64, context: &RequestContext) -> Result<Value> {
        let path = format!("{}/{}/points", ResourceKind::Members.path(), member_id);
        self.gateway.get(&path, context).await
    }

    pub async fn member_point_transactions(&self, member_id: u64, context: &RequestContext) -> Result<Value> {
        let path = format!("{}/{}/points/transactions", ResourceKind::Members.path(), member_id);
        self.gateway.get(&path, context).await
    }

    pub async fn add_member_points(&self, member_id: u64, points: &Value, context: &RequestContext) -> Result<Value> {
        let path = format!("{}/{}/points/add", ResourceKind::Members.path(), member_id);
        self.gateway.post(&path, points, context).await
    }

    pub async fn deduct_member_points(&self, member_id: u64, points: &Value, context: &RequestContext) -> Result<Value> {
        let path = format!("{}/{}/points/deduct", ResourceKind::Members.path(), member_id);
        self.gateway.post(&path, points, context).await
    }

    pub async fn recalculate_member_level(&self, member_id: u64, context: &RequestContext) -> Result<Value> {
        let path = format!("{}/{}/level/calculate", ResourceKind::Members.path(), member_id);
        self.gateway.post(&path, &Value::Null, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_names_round_trip() {
        for kind in ResourceKind::ALL {
            assert_eq!(ResourceKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ResourceKind::Suppliers.name(), "suppliers");
        assert_eq!(ResourceKind::InventoryAlerts.name(), "inventory-alerts");
        assert_eq!(ResourceKind::from_name("customers"), None);
    }
}
