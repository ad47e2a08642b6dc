//! Read and claim permission for mailbox addresses.
//!
//! | Ownership      | Anonymous | User               | Admin     |
//! |----------------|-----------|--------------------|-----------|
//! | unowned        | AllowRead | AllowClaimThenRead | AllowRead |
//! | owned by self  | n/a       | AllowRead          | AllowRead |
//! | owned by other | Forbidden | Forbidden          | AllowRead |
//!
//! An address absent from the merged view is `NotFound` for every actor.

use serde::Serialize;
use tracing::{debug, warn};

use crate::mailbox::UserId;
use crate::ownership::{ClaimOutcome, OwnershipStore};
use crate::{Result, TempboxError};

/// Who is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// No session.
    Anonymous,
    /// Authenticated regular user.
    User(UserId),
    /// Authenticated administrator.
    Admin(UserId),
}

impl Actor {
    /// The authenticated user ID, if any.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Actor::Anonymous => None,
            Actor::User(id) | Actor::Admin(id) => Some(*id),
        }
    }

    /// Check if this actor is an administrator.
    pub fn is_admin(&self) -> bool {
        matches!(self, Actor::Admin(_))
    }
}

/// Outcome of an access check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessDecision {
    /// Read may proceed.
    AllowRead,
    /// Read may proceed after the actor claims the address.
    AllowClaimThenRead,
    /// Someone else owns the address.
    Forbidden,
    /// The address does not exist.
    NotFound,
}

impl AccessDecision {
    /// HTTP status for this decision.
    pub fn status_code(&self) -> u16 {
        match self {
            AccessDecision::AllowRead | AccessDecision::AllowClaimThenRead => 200,
            AccessDecision::Forbidden => 403,
            AccessDecision::NotFound => 404,
        }
    }

    /// Check whether the read may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(
            self,
            AccessDecision::AllowRead | AccessDecision::AllowClaimThenRead
        )
    }

    /// Decide from the address state.
    ///
    /// `owner` is `None` when the address does not exist and `Some(None)`
    /// when it exists without an owner.
    pub fn for_owner(actor: Actor, owner: Option<Option<UserId>>) -> Self {
        let Some(owner) = owner else {
            return AccessDecision::NotFound;
        };
        match (actor, owner) {
            (Actor::Admin(_), _) => AccessDecision::AllowRead,
            (Actor::Anonymous, None) => AccessDecision::AllowRead,
            (Actor::Anonymous, Some(_)) => AccessDecision::Forbidden,
            (Actor::User(_), None) => AccessDecision::AllowClaimThenRead,
            (Actor::User(id), Some(owner)) if id == owner => AccessDecision::AllowRead,
            (Actor::User(_), Some(_)) => AccessDecision::Forbidden,
        }
    }
}

/// Gate in front of every mailbox read.
#[derive(Debug, Clone, Copy)]
pub struct AccessGate<'a> {
    ownership: OwnershipStore<'a>,
}

impl<'a> AccessGate<'a> {
    /// Create a gate over an ownership store.
    pub fn new(ownership: OwnershipStore<'a>) -> Self {
        Self { ownership }
    }

    /// The pre-claim decision. Performs no writes.
    pub async fn decide(&self, actor: Actor, address: &str) -> Result<AccessDecision> {
        let owner = self.ownership.lookup(address).await?.map(|a| a.owner_id);
        Ok(AccessDecision::for_owner(actor, owner))
    }

    /// The final decision, claiming the address first when required.
    ///
    /// Never returns [`AccessDecision::AllowClaimThenRead`].
    pub async fn authorize_read(&self, actor: Actor, address: &str) -> Result<AccessDecision> {
        let decision = self.decide(actor, address).await?;
        let (AccessDecision::AllowClaimThenRead, Actor::User(user_id)) = (decision, actor) else {
            debug!("Access to {} for {:?}: {:?}", address, actor, decision);
            return Ok(decision);
        };

        let outcome = self.ownership.claim(address, user_id).await?;
        if outcome.is_owner() {
            return Ok(AccessDecision::AllowRead);
        }

        // Lost the race; trust only the owner recorded after the claim.
        let decision = match self.ownership.lookup(address).await? {
            Some(record) if record.is_owned_by(user_id) => AccessDecision::AllowRead,
            Some(_) => AccessDecision::Forbidden,
            None => AccessDecision::NotFound,
        };
        if outcome == ClaimOutcome::Conflict {
            warn!("User {} lost claim race for {}: {:?}", user_id, address, decision);
        }
        Ok(decision)
    }

    /// Like [`AccessGate::authorize_read`], but maps denial to an error.
    pub async fn require_read(&self, actor: Actor, address: &str) -> Result<()> {
        let decision = self.authorize_read(actor, address).await?;
        if decision.is_allowed() {
            return Ok(());
        }
        match decision {
            AccessDecision::NotFound => Err(TempboxError::NotFound("address".to_string())),
            _ => Err(TempboxError::Forbidden(format!(
                "address {address} belongs to another user"
            ))),
        }
    }
}
