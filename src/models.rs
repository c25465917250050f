use chrono::{DateTime, Utc};
use diesel::{
    Selectable,
    prelude::{AsChangeset, Identifiable, Insertable, Queryable},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

// Catalog

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::products)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProductEntity {
    pub id: i32,
    pub vendor_id: Option<i32>,
    pub name: String,
    pub description: String,
    pub price: f32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Deserialize, Debug)]
#[diesel(table_name = crate::schema::products)]
pub struct CreateProductEntity {
    pub vendor_id: Option<i32>,
    pub name: String,
    pub description: String,
    pub price: f32,
    pub is_active: bool,
}

#[derive(AsChangeset, Deserialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::products)]
pub struct UpdateProductEntity {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f32>,
    pub is_active: Option<bool>,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::categories)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CategoryEntity {
    pub id: i32,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Deserialize, Debug)]
#[diesel(table_name = crate::schema::categories)]
pub struct CreateCategoryEntity {
    pub name: String,
}

#[derive(Queryable, Selectable, Insertable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::product_categories)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ProductCategoryEntity {
    pub product_id: i32,
    pub category_id: i32,
}

// Carts

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::carts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CartEntity {
    pub id: i32,
    pub user_id: Option<i32>,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::cart_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CartItemEntity {
    pub cart_id: i32,
    pub product_id: i32,
    pub quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Deserialize, Debug)]
#[diesel(table_name = crate::schema::carts)]
pub struct CreateCartEntity {
    pub user_id: Option<i32>,
    pub session_id: Option<String>,
}

#[derive(Insertable, Deserialize, Debug)]
#[diesel(table_name = crate::schema::cart_items)]
pub struct CreateCartItemEntity {
    pub cart_id: i32,
    pub product_id: i32,
    pub quantity: i32,
}

// Orders

#[derive(Queryable, Serialize, Selectable, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderEntity {
    pub id: i32,
    pub user_id: i32,
    pub status: String,
    pub payment_method: String,
    pub shipping_address: Value,
    pub total: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::orders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreateOrderEntity {
    pub user_id: i32,
    pub status: String,
    pub payment_method: String,
    pub shipping_address: Value,
    pub total: f32,
}

#[derive(Queryable, Selectable, Insertable, Serialize, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::order_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct OrderItemEntity {
    pub order_id: i32,
    pub product_id: i32,
    pub product_name: String,
    pub unit_price: f32,
    pub quantity: i32,
}

#[derive(Queryable, Serialize, Selectable, Debug, Clone, ToSchema)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct PaymentEntity {
    pub id: Uuid,
    pub order_id: i32,
    pub amount: f32,
    pub status: String,
    pub provider: String,
    pub provider_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Serialize, Deserialize, Debug)]
#[diesel(table_name = crate::schema::payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct CreatePaymentEntity {
    pub order_id: i32,
    pub amount: f32,
    pub provider: String,
    pub status: String,
    pub provider_ref: Option<String>,
}

// Vendors

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::vendors)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct VendorEntity {
    pub id: i32,
    pub user_id: i32,
    pub shop_name: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Insertable, Deserialize, Debug)]
#[diesel(table_name = crate::schema::vendors)]
pub struct CreateVendorEntity {
    pub user_id: i32,
    pub shop_name: String,
    pub status: String,
}

// Wishlist

#[derive(Queryable, Selectable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::wishlist_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct WishlistItemEntity {
    pub user_id: i32,
    pub product_id: i32,
    pub created_at: DateTime<Utc>,
}

// Loyalty points

#[derive(Queryable, Selectable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::loyalty_points)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct LoyaltyPointsEntity {
    pub user_id: i32,
    pub points: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Media library

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::media_folders)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MediaFolderEntity {
    pub id: i32,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Identifiable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::media_files)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct MediaFileEntity {
    pub id: Uuid,
    pub folder_id: Option<i32>,
    pub file_name: String,
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub thumbnail_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = crate::schema::media_files)]
pub struct CreateMediaFileEntity {
    pub id: Uuid,
    pub folder_id: Option<i32>,
    pub file_name: String,
    pub original_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub thumbnail_name: Option<String>,
}

// Settings

#[derive(Queryable, Selectable, Serialize, Debug, ToSchema)]
#[diesel(table_name = crate::schema::settings)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct SettingEntity {
    pub key: String,
    pub value: Value,
    pub updated_at: DateTime<Utc>,
}
