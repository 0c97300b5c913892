//! [`Command`] for redeeming a pairing [`Token`].

use common::{
    operations::{By, Select},
    DateTime,
};
use derive_more::{Display, Error, From};
use jsonwebtoken::errors::ErrorKind as JwtErrorKind;
use tracerr::Traced;

use crate::{
    domain::{
        session::{
            self,
            pairing::{Claims, Token},
            PairingCode, Status,
        },
        Session,
    },
    infra::{database, Database},
    rejection::{AsRejection, Reason, Rejection},
    Service,
};

use super::Command;

/// [`Command`] for redeeming a pairing [`Token`] into its [`Claims`].
///
/// The raw identity the pairing was started by is never exposed, only its
/// hash.
#[derive(Clone, Debug, From)]
pub enum RedeemPairingToken {
    /// Redeem the signed [`Token`] itself.
    Token(Token),

    /// Redeem the [`PairingCode`] displayed alongside the QR code.
    Code(PairingCode),
}

/// Output of [`RedeemPairingToken`] [`Command`].
#[derive(Clone, Debug)]
pub struct Output {
    /// [`Session`] to be paired.
    pub session: Session,

    /// [`Claims`] to activate the [`Session`] with.
    pub claims: Claims,
}

impl<Db, Gw> Command<RedeemPairingToken> for Service<Db, Gw>
where
    Db: Database<
            Select<By<Option<Session>, session::Id>>,
            Ok = Option<Session>,
            Err = Traced<database::Error>,
        > + for<'c> Database<
            Select<By<Option<Session>, &'c PairingCode>>,
            Ok = Option<Session>,
            Err = Traced<database::Error>,
        >,
{
    type Ok = Output;
    type Err = Traced<ExecutionError>;

    async fn execute(
        &self,
        cmd: RedeemPairingToken,
    ) -> Result<Self::Ok, Self::Err> {
        use ExecutionError as E;

        let now = DateTime::now();
        let (session, claims) = match cmd {
            RedeemPairingToken::Token(token) => {
                let mut validation = jsonwebtoken::Validation::default();
                validation.leeway = 0;
                let claims = jsonwebtoken::decode::<Claims>(
                    token.as_ref(),
                    &self.config().jwt_decoding_key,
                    &validation,
                )
                .map_err(|e| {
                    if matches!(e.kind(), JwtErrorKind::ExpiredSignature) {
                        E::TokenExpired
                    } else {
                        E::InvalidToken(e)
                    }
                })
                .map_err(tracerr::wrap!())?
                .claims;

                let session = self
                    .database()
                    .execute(Select(By::<Option<Session>, _>::new(
                        claims.session_id,
                    )))
                    .await
                    .map_err(tracerr::map_from_and_wrap!(=> E))?
                    .ok_or(E::SessionNotExists(claims.session_id))
                    .map_err(tracerr::wrap!())?;
                (session, claims)
            }
            RedeemPairingToken::Code(code) => {
                let session = self
                    .database()
                    .execute(Select(By::<Option<Session>, _>::new(&code)))
                    .await
                    .map_err(tracerr::map_from_and_wrap!(=> E))?
                    .ok_or_else(|| E::CodeNotExists(code.clone()))
                    .map_err(tracerr::wrap!())?;
                let pairing = session
                    .pairing
                    .as_ref()
                    .ok_or_else(|| E::CodeNotExists(code.clone()))
                    .map_err(tracerr::wrap!())?;
                let claims = Claims {
                    session_id: session.id,
                    identity_hash: pairing.identity_hash.clone(),
                    expires_at: pairing.token_expires_at,
                };
                (session, claims)
            }
        };

        if claims.expires_at.has_passed(now) {
            return Err(tracerr::new!(E::TokenExpired));
        }
        if session.is_expired(now) || session.status == Status::Expired {
            return Err(tracerr::new!(E::SessionExpired(session.id)));
        }
        if session.status.is_terminal() {
            return Err(tracerr::new!(E::WrongStatus(session.status)));
        }

        Ok(Output { session, claims })
    }
}

/// Error of [`RedeemPairingToken`] [`Command`] execution.
#[derive(Debug, Display, Error, From)]
pub enum ExecutionError {
    /// [`Database`] error.
    #[display("`Database` operation failed: {_0}")]
    Db(database::Error),

    /// [`Token`] is malformed or forged.
    #[display("Invalid pairing token: {_0}")]
    #[from(ignore)]
    InvalidToken(jsonwebtoken::errors::Error),

    /// [`Token`] has expired.
    #[display("Pairing token has expired")]
    TokenExpired,

    /// No active [`Session`] displays the [`PairingCode`].
    #[display("Pairing code `{_0}` does not exist")]
    #[from(ignore)]
    CodeNotExists(#[error(not(source))] PairingCode),

    /// [`Session`] doesn't exist.
    #[display("`Session(id: {_0})` does not exist")]
    #[from(ignore)]
    SessionNotExists(#[error(not(source))] session::Id),

    /// [`Session`] has expired.
    #[display("`Session(id: {_0})` has expired")]
    #[from(ignore)]
    SessionExpired(#[error(not(source))] session::Id),

    /// [`Session`] is finished already.
    #[display("`Session` is `{_0}` already")]
    #[from(ignore)]
    WrongStatus(#[error(not(source))] Status),
}

impl AsRejection for ExecutionError {
    fn as_rejection(&self) -> Rejection {
        let reason = match self {
            Self::Db(_) => return Rejection::transient(self),
            Self::InvalidToken(_) => Reason::InvalidToken,
            Self::TokenExpired => Reason::TokenExpired,
            Self::CodeNotExists(_) => Reason::CodeNotFound,
            Self::SessionNotExists(_) => Reason::SessionNotFound,
            Self::SessionExpired(_) => Reason::SessionExpired,
            Self::WrongStatus(_) => Reason::InvalidState,
        };
        Rejection::new(reason, self)
    }
}
