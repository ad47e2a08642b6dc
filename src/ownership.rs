//! Address ownership for tempbox.
//!
//! Ownership changes only through single conditional statements on the
//! active store. A read may follow a write to classify its outcome, but
//! never precedes a write as a check.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::db::DualStoreMerger;
use crate::mailbox::{validate_address, Address, AddressRepository, InsertOutcome, UserId};
use crate::Result;

/// Result of a claim attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    /// This call made the user the owner.
    Claimed,
    /// The user already owned the address.
    AlreadyOwnedBySelf,
    /// Another user owns the address.
    Conflict,
}

impl ClaimOutcome {
    /// Check whether the caller owns the address after the claim.
    pub fn is_owner(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed | ClaimOutcome::AlreadyOwnedBySelf)
    }

    fn classify(owner: Option<UserId>, user_id: UserId) -> Self {
        if owner == Some(user_id) {
            ClaimOutcome::AlreadyOwnedBySelf
        } else {
            ClaimOutcome::Conflict
        }
    }
}

/// Claim, transfer and query address ownership.
#[derive(Debug, Clone, Copy)]
pub struct OwnershipStore<'a> {
    merger: DualStoreMerger<'a>,
    address_ttl: Duration,
}

impl<'a> OwnershipStore<'a> {
    /// Create an ownership store. `address_ttl` applies to addresses first
    /// created by a claim.
    pub fn new(merger: DualStoreMerger<'a>, address_ttl: Duration) -> Self {
        Self {
            merger,
            address_ttl,
        }
    }

    /// Claim an address for a user.
    pub async fn claim(&self, address: &str, user_id: UserId) -> Result<ClaimOutcome> {
        self.claim_at(address, user_id, crate::datetime::now()).await
    }

    /// Claim an address for a user, creating it at `now` if it exists nowhere.
    pub async fn claim_at(
        &self,
        address: &str,
        user_id: UserId,
        now: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        let key = address.to_lowercase();
        let repo = AddressRepository::new(self.merger.active());

        if repo.claim_if_unowned(&key, user_id).await? {
            info!("User {} claimed {}", user_id, key);
            return Ok(ClaimOutcome::Claimed);
        }
        if let Some(current) = self.merger.get_active::<Address>(&key).await? {
            return Ok(ClaimOutcome::classify(current.owner_id, user_id));
        }

        // Not in the active store: promote the historical row or create one,
        // carrying the claimant as owner whenever the row has none.
        let (candidate, carries_claim) = match self.merger.get_historical::<Address>(&key).await? {
            Some(historical) if historical.owner_id.is_none() => {
                (historical.with_owner(user_id), true)
            }
            Some(historical) => (historical, false),
            None => {
                validate_address(&key)?;
                let fresh = Address::new_orphan(&key, self.address_ttl, now).with_owner(user_id);
                (fresh, true)
            }
        };

        match repo.insert(&candidate).await? {
            InsertOutcome::Inserted if carries_claim => {
                info!("User {} claimed {}", user_id, key);
                Ok(ClaimOutcome::Claimed)
            }
            InsertOutcome::Inserted => {
                debug!("Promoted {} into active store on claim", key);
                Ok(ClaimOutcome::classify(candidate.owner_id, user_id))
            }
            InsertOutcome::Duplicate => {
                // A concurrent writer created the row first; retry against it.
                if repo.claim_if_unowned(&key, user_id).await? {
                    info!("User {} claimed {}", user_id, key);
                    return Ok(ClaimOutcome::Claimed);
                }
                let owner = self
                    .merger
                    .get_active::<Address>(&key)
                    .await?
                    .and_then(|a| a.owner_id);
                Ok(ClaimOutcome::classify(owner, user_id))
            }
        }
    }

    /// Move ownership from one user to another.
    ///
    /// Returns false without error when `from_user` does not own the address.
    pub async fn transfer(&self, from_user: UserId, to_user: UserId, address: &str) -> Result<bool> {
        let key = address.to_lowercase();
        if self.merger.promote::<Address>(&key).await?.is_none() {
            return Ok(false);
        }
        let moved = AddressRepository::new(self.merger.active())
            .transfer(&key, from_user, to_user)
            .await?;
        if moved {
            info!("Transferred {} from user {} to user {}", key, from_user, to_user);
        }
        Ok(moved)
    }

    /// Administrative assignment. Overrides any current owner.
    ///
    /// Returns false if the address does not exist.
    pub async fn assign(&self, address: &str, user_id: UserId) -> Result<bool> {
        let key = address.to_lowercase();
        if self.merger.promote::<Address>(&key).await?.is_none() {
            return Ok(false);
        }
        let assigned = AddressRepository::new(self.merger.active())
            .assign(&key, user_id)
            .await?;
        if assigned {
            info!("Assigned {} to user {}", key, user_id);
        }
        Ok(assigned)
    }

    /// The address record from the merged view.
    pub async fn lookup(&self, address: &str) -> Result<Option<Address>> {
        self.merger.get(&address.to_lowercase()).await
    }

    /// Check whether an address has an owner.
    pub async fn is_owned(&self, address: &str) -> Result<bool> {
        Ok(self.owner_of(address).await?.is_some())
    }

    /// The owner of an address, if it exists and is owned.
    pub async fn owner_of(&self, address: &str) -> Result<Option<UserId>> {
        Ok(self.lookup(address).await?.and_then(|a| a.owner_id))
    }

    /// Every address owned by a user, from the merged view.
    pub async fn addresses_of(&self, user_id: UserId) -> Result<Vec<Address>> {
        // Filtering after the merge hides historical rows whose active copy
        // has since changed owner.
        let all: Vec<Address> = self.merger.get_all().await?;
        Ok(all.into_iter().filter(|a| a.is_owned_by(user_id)).collect())
    }

    /// Delete every active address a user owns. Their messages cascade.
    pub async fn release_all_for(&self, user_id: UserId) -> Result<u64> {
        let deleted = AddressRepository::new(self.merger.active())
            .delete_for_owner(user_id)
            .await?;
        info!("Released {} addresses of user {}", deleted, user_id);
        Ok(deleted)
    }
}
