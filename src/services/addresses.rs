use crate::{
    auth::OwnerKey,
    entities::{address, Address},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::instrument;
use uuid::Uuid;
use validator::Validate;

/// Address book for users and guests.
///
/// Default selection policy: the owner's first address becomes the default;
/// explicitly flagging a later one switches it (unsetting the others).
#[derive(Clone)]
pub struct AddressService {
    db: Arc<DatabaseConnection>,
}

impl AddressService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    #[instrument(skip(self, input))]
    pub async fn create_address(
        &self,
        owner: &OwnerKey,
        input: CreateAddressInput,
    ) -> Result<address::Model, ServiceError> {
        input.validate()?;

        let existing = Address::find()
            .filter(owner_condition(owner))
            .count(&*self.db)
            .await?;
        let make_default = input.is_default.unwrap_or(false) || existing == 0;

        if make_default && existing > 0 {
            self.unset_defaults(owner).await?;
        }

        let now = Utc::now();
        let model = address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(owner.user_id()),
            guest_id: Set(owner.guest_id().map(str::to_string)),
            name: Set(input.name),
            email: Set(input.email),
            phone: Set(input.phone),
            line1: Set(input.line1),
            line2: Set(input.line2),
            city: Set(input.city),
            state: Set(input.state),
            postal_code: Set(input.postal_code),
            country: Set(input.country.unwrap_or_else(|| "IN".to_string())),
            is_default: Set(make_default),
            created_at: Set(now),
            updated_at: Set(now),
        };

        Ok(model.insert(&*self.db).await?)
    }

    /// All addresses for an owner, default first.
    pub async fn list_addresses(
        &self,
        owner: &OwnerKey,
    ) -> Result<Vec<address::Model>, ServiceError> {
        Ok(Address::find()
            .filter(owner_condition(owner))
            .order_by_desc(address::Column::IsDefault)
            .order_by_desc(address::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Make the given address the owner's default.
    #[instrument(skip(self))]
    pub async fn set_default(
        &self,
        owner: &OwnerKey,
        address_id: Uuid,
    ) -> Result<address::Model, ServiceError> {
        let addr = Address::find_by_id(address_id)
            .filter(owner_condition(owner))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Address {} not found", address_id)))?;

        self.unset_defaults(owner).await?;

        let mut active: address::ActiveModel = addr.into();
        active.is_default = Set(true);
        active.updated_at = Set(Utc::now());
        Ok(active.update(&*self.db).await?)
    }

    async fn unset_defaults(&self, owner: &OwnerKey) -> Result<(), ServiceError> {
        let update = address::ActiveModel {
            is_default: Set(false),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        Address::update_many()
            .set(update)
            .filter(owner_condition(owner))
            .filter(address::Column::IsDefault.eq(true))
            .exec(&*self.db)
            .await?;
        Ok(())
    }
}

fn owner_condition(owner: &OwnerKey) -> Condition {
    match owner {
        OwnerKey::User(id) => Condition::all().add(address::Column::UserId.eq(*id)),
        OwnerKey::Guest(id) => Condition::all().add(address::Column::GuestId.eq(id.clone())),
    }
}

/// Input for creating an address
#[derive(Debug, Deserialize, Validate)]
pub struct CreateAddressInput {
    #[validate(length(min = 1))]
    pub name: String,
    #[validate(email)]
    pub email: Option<String>,
    pub phone: Option<String>,
    #[validate(length(min = 1))]
    pub line1: String,
    pub line2: Option<String>,
    #[validate(length(min = 1))]
    pub city: String,
    #[validate(length(min = 1))]
    pub state: String,
    #[validate(length(min = 4))]
    pub postal_code: String,
    #[validate(length(equal = 2))]
    pub country: Option<String>,
    pub is_default: Option<bool>,
}
