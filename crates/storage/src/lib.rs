use std::str::FromStr;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use sqlx::{
    migrate::MigrateError, sqlite::SqlitePoolOptions, Row, Sqlite, SqlitePool, Transaction,
};
use thiserror::Error;
use uuid::Uuid;

use registrar_core::types::{
    ActionNeededReason, Contact, Domain, DomainRequest, DomainRequestStatus, DomainRole,
    DomainState, GenericOrgType, IdentityClaims, OrganizationType, RejectionReason, User,
    VerificationType,
};

/// Top-level database handle that owns the SQLite connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Establishes a new SQLite connection pool for the provided connection string.
    pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(StorageError::Connect)?;

        apply_pragmas(&pool).await?;

        Ok(Self { pool })
    }

    /// Applies migrations located under `migrations/`.
    pub async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(StorageError::Migration)?;
        Ok(())
    }

    /// Begins a transaction spanning several repositories.
    pub async fn begin(&self) -> Result<Transaction<'_, Sqlite>, sqlx::Error> {
        self.pool.begin().await
    }

    /// Returns a handle for interacting with user accounts.
    pub fn users(&self) -> UserRepository {
        UserRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for interacting with contacts.
    pub fn contacts(&self) -> ContactRepository {
        ContactRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for interacting with registered domains.
    pub fn domains(&self) -> DomainRepository {
        DomainRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for interacting with domain requests.
    pub fn domain_requests(&self) -> DomainRequestRepository {
        DomainRequestRepository {
            pool: self.pool.clone(),
        }
    }

    /// Returns a handle for manipulating user roles on domains.
    pub fn domain_roles(&self) -> DomainRoleRepository {
        DomainRoleRepository {
            pool: self.pool.clone(),
        }
    }

    /// Exposes the inner pool when lower level access is required.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

async fn apply_pragmas(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query("PRAGMA foreign_keys = ON;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA journal_mode = WAL;")
        .fetch_one(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA synchronous = NORMAL;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    sqlx::query("PRAGMA busy_timeout = 5000;")
        .execute(pool)
        .await
        .map_err(StorageError::Pragma)?;

    Ok(())
}

/// General storage level errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("failed to connect to sqlite: {0}")]
    Connect(sqlx::Error),
    #[error("failed to apply pragma: {0}")]
    Pragma(sqlx::Error),
    #[error("failed to run database migrations: {0}")]
    Migration(MigrateError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

const SQLITE_UNIQUE_VIOLATION: &str = "2067";

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some(SQLITE_UNIQUE_VIOLATION),
        _ => false,
    }
}

fn to_rfc3339(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_uuid(column: &str, value: &str) -> Result<Uuid, sqlx::Error> {
    Uuid::parse_str(value).map_err(|err| sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: Box::new(err),
    })
}

/// Resolves pagination inputs to an effective page, page count and row
/// window. Pages are 1-based and out-of-range pages clamp to the edges.
fn paginate(total: u64, page: u32, per_page: u32) -> (u32, u32, i64, i64) {
    let per_page = per_page.max(1);
    let num_pages = ((total + u64::from(per_page) - 1) / u64::from(per_page)).max(1) as u32;
    let page = page.clamp(1, num_pages);
    let offset = i64::from(page - 1) * i64::from(per_page);
    (page, num_pages, i64::from(per_page), offset)
}

/// One page of rows plus the envelope values listings report.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub num_pages: u32,
}

impl<T> Page<T> {
    pub fn has_previous(&self) -> bool {
        self.page > 1
    }

    pub fn has_next(&self) -> bool {
        self.page < self.num_pages
    }
}

/// Sort order shared by the listing queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
}

impl SortOrder {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Repository used to create and update user accounts.
#[derive(Clone)]
pub struct UserRepository {
    pool: SqlitePool,
}

/// Data required to create a user from identity-provider claims.
pub struct NewUser<'a> {
    pub id: Uuid,
    pub claims: &'a IdentityClaims,
    pub verification_type: VerificationType,
    pub created_at: DateTime<Utc>,
}

impl UserRepository {
    /// Inserts a new user populated from the provided claims.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &NewUser<'_>,
    ) -> Result<(), UserError> {
        let stamp = to_rfc3339(record.created_at);
        sqlx::query(
            "INSERT INTO users \
             (id, idp_subject, first_name, last_name, email, phone, verification_type, \
              is_staff, is_restricted, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&record.claims.subject)
        .bind(&record.claims.given_name)
        .bind(&record.claims.family_name)
        .bind(&record.claims.email)
        .bind(&record.claims.phone)
        .bind(record.verification_type.as_str())
        .bind(&stamp)
        .bind(&stamp)
        .execute(&mut **tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                UserError::DuplicateSubject
            } else {
                UserError::Database(err)
            }
        })?;

        Ok(())
    }

    /// Loads the user owning the provided identity-provider subject.
    pub async fn fetch_by_subject(&self, subject: &str) -> Result<Option<User>, UserError> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE idp_subject = ?")
            .bind(subject)
            .fetch_optional(&self.pool)
            .await?;

        row.map(UserRow::into_domain).transpose().map_err(Into::into)
    }

    /// Loads a user by id.
    pub async fn fetch(&self, id: Uuid) -> Result<Option<User>, UserError> {
        let row = sqlx::query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(UserRow::into_domain).transpose().map_err(Into::into)
    }

    /// Applies identity-provider claim updates to the user record only.
    pub async fn apply_claim_updates(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        user_id: Uuid,
        claims: &IdentityClaims,
        updated_at: DateTime<Utc>,
    ) -> Result<(), UserError> {
        let result = sqlx::query(
            "UPDATE users SET first_name = ?, last_name = ?, email = ?, phone = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(&claims.given_name)
        .bind(&claims.family_name)
        .bind(&claims.email)
        .bind(&claims.phone)
        .bind(to_rfc3339(updated_at))
        .bind(user_id.to_string())
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(UserError::NotFound);
        }
        Ok(())
    }

    /// Flags the user as restricted from submitting or editing requests.
    pub async fn restrict(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        user_id: Uuid,
        updated_at: DateTime<Utc>,
    ) -> Result<(), UserError> {
        let result = sqlx::query("UPDATE users SET is_restricted = 1, updated_at = ? WHERE id = ?")
            .bind(to_rfc3339(updated_at))
            .bind(user_id.to_string())
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(UserError::NotFound);
        }
        Ok(())
    }

    /// Grants or revokes the staff flag.
    pub async fn set_staff(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        user_id: Uuid,
        is_staff: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<(), UserError> {
        let result = sqlx::query("UPDATE users SET is_staff = ?, updated_at = ? WHERE id = ?")
            .bind(i64::from(is_staff))
            .bind(to_rfc3339(updated_at))
            .bind(user_id.to_string())
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(UserError::NotFound);
        }
        Ok(())
    }
}

/// Errors raised by the user repository.
#[derive(Debug, Error)]
pub enum UserError {
    #[error("a user with this identity-provider subject already exists")]
    DuplicateSubject,
    #[error("user not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: String,
    idp_subject: String,
    first_name: String,
    last_name: String,
    email: String,
    phone: Option<String>,
    verification_type: String,
    is_staff: i64,
    is_restricted: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl UserRow {
    fn into_domain(self) -> Result<User, sqlx::Error> {
        Ok(User {
            id: parse_uuid("id", &self.id)?,
            idp_subject: self.idp_subject,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            phone: self.phone,
            verification_type: VerificationType::from_str(&self.verification_type)
                .unwrap_or(VerificationType::Regular),
            is_staff: self.is_staff != 0,
            is_restricted: self.is_restricted != 0,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Repository used to create, look up and link contacts.
#[derive(Clone)]
pub struct ContactRepository {
    pool: SqlitePool,
}

/// Data required to create a contact.
pub struct NewContact<'a> {
    pub user_id: Option<Uuid>,
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: &'a str,
    pub phone: Option<&'a str>,
    pub created_at: DateTime<Utc>,
}

impl ContactRepository {
    /// Inserts a contact and returns its generated id.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &NewContact<'_>,
    ) -> Result<i64, ContactError> {
        let stamp = to_rfc3339(record.created_at);
        let row = sqlx::query(
            "INSERT INTO contacts (user_id, first_name, last_name, email, phone, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             RETURNING id",
        )
        .bind(record.user_id.map(|id| id.to_string()))
        .bind(record.first_name)
        .bind(record.last_name)
        .bind(record.email)
        .bind(record.phone)
        .bind(&stamp)
        .bind(&stamp)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.get("id"))
    }

    /// Lists contacts matching an email address, lowest id first.
    pub async fn find_by_email(&self, email: &str) -> Result<Vec<Contact>, ContactError> {
        let rows =
            sqlx::query_as::<_, ContactRow>("SELECT * FROM contacts WHERE email = ? ORDER BY id ASC")
                .bind(email)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(ContactRow::into_domain)
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }

    /// Loads the contact linked to the provided user, if any.
    pub async fn fetch_for_user(&self, user_id: Uuid) -> Result<Option<Contact>, ContactError> {
        let row = sqlx::query_as::<_, ContactRow>("SELECT * FROM contacts WHERE user_id = ?")
            .bind(user_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(ContactRow::into_domain)
            .transpose()
            .map_err(Into::into)
    }

    /// Loads a contact by id.
    pub async fn fetch(&self, id: i64) -> Result<Option<Contact>, ContactError> {
        let row = sqlx::query_as::<_, ContactRow>("SELECT * FROM contacts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(ContactRow::into_domain)
            .transpose()
            .map_err(Into::into)
    }

    /// Links an existing contact to a user without touching its values.
    pub async fn link_user(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        contact_id: i64,
        user_id: Uuid,
        updated_at: DateTime<Utc>,
    ) -> Result<(), ContactError> {
        let result = sqlx::query("UPDATE contacts SET user_id = ?, updated_at = ? WHERE id = ?")
            .bind(user_id.to_string())
            .bind(to_rfc3339(updated_at))
            .bind(contact_id)
            .execute(&mut **tx)
            .await
            .map_err(|err| {
                if is_unique_violation(&err) {
                    ContactError::UserAlreadyLinked
                } else {
                    ContactError::Database(err)
                }
            })?;

        if result.rows_affected() == 0 {
            return Err(ContactError::NotFound);
        }
        Ok(())
    }
}

/// Errors raised by the contact repository.
#[derive(Debug, Error)]
pub enum ContactError {
    #[error("contact not found")]
    NotFound,
    #[error("the user is already linked to another contact")]
    UserAlreadyLinked,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, sqlx::FromRow)]
struct ContactRow {
    id: i64,
    user_id: Option<String>,
    first_name: String,
    last_name: String,
    email: String,
    phone: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ContactRow {
    fn into_domain(self) -> Result<Contact, sqlx::Error> {
        let user_id = self
            .user_id
            .as_deref()
            .map(|value| parse_uuid("user_id", value))
            .transpose()?;
        Ok(Contact {
            id: self.id,
            user_id,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            phone: self.phone,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Sort keys accepted by the domain listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DomainSortKey {
    #[default]
    Name,
    State,
    ExpirationDate,
    CreatedAt,
}

impl DomainSortKey {
    fn column(self) -> &'static str {
        match self {
            Self::Name => "d.name",
            Self::State => "d.state",
            Self::ExpirationDate => "d.expiration_date",
            Self::CreatedAt => "d.created_at",
        }
    }
}

/// Pagination and sorting inputs for domain listings.
#[derive(Debug, Clone, Copy)]
pub struct DomainListParams {
    pub sort: DomainSortKey,
    pub order: SortOrder,
    pub page: u32,
    pub per_page: u32,
}

/// Repository managing registered domains.
#[derive(Clone)]
pub struct DomainRepository {
    pool: SqlitePool,
}

/// Data required to record a newly provisioned domain.
pub struct NewDomain<'a> {
    pub id: Uuid,
    pub name: &'a str,
    pub state: DomainState,
    pub expiration_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl DomainRepository {
    /// Inserts a domain row for a provisioned domain.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &NewDomain<'_>,
    ) -> Result<(), DomainError> {
        let stamp = to_rfc3339(record.created_at);
        sqlx::query(
            "INSERT INTO domains (id, name, state, expiration_date, first_ready_at, created_at, updated_at) \
             VALUES (?, ?, ?, ?, NULL, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.name)
        .bind(record.state.as_str())
        .bind(record.expiration_date)
        .bind(&stamp)
        .bind(&stamp)
        .execute(&mut **tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                DomainError::NameInUse(record.name.to_string())
            } else {
                DomainError::Database(err)
            }
        })?;

        Ok(())
    }

    /// Loads a domain by id.
    pub async fn fetch(&self, id: Uuid) -> Result<Option<Domain>, DomainError> {
        let row = sqlx::query_as::<_, DomainRow>("SELECT * FROM domains WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(DomainRow::into_domain)
            .transpose()
            .map_err(Into::into)
    }

    /// Returns `true` when a non-deleted domain already claims the name.
    pub async fn live_name_exists(&self, name: &str) -> Result<bool, DomainError> {
        let row =
            sqlx::query("SELECT COUNT(*) AS n FROM domains WHERE name = ? AND state != 'deleted'")
                .bind(name)
                .fetch_one(&self.pool)
                .await?;
        let count: i64 = row.get("n");
        Ok(count > 0)
    }

    /// Updates the registry state, stamping `first_ready_at` the first
    /// time the domain reaches ready.
    pub async fn update_state(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: Uuid,
        state: DomainState,
        updated_at: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        let first_ready = matches!(state, DomainState::Ready).then(|| to_rfc3339(updated_at));
        let result = sqlx::query(
            "UPDATE domains \
             SET state = ?, first_ready_at = COALESCE(first_ready_at, ?), updated_at = ? \
             WHERE id = ?",
        )
        .bind(state.as_str())
        .bind(first_ready)
        .bind(to_rfc3339(updated_at))
        .bind(id.to_string())
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }

    /// Removes a domain row entirely; roles cascade away with it.
    pub async fn delete(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        id: Uuid,
    ) -> Result<(), DomainError> {
        let result = sqlx::query("DELETE FROM domains WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut **tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound);
        }
        Ok(())
    }

    /// Lists the domains a user holds a role on.
    pub async fn list_for_user(
        &self,
        user_id: Uuid,
        params: &DomainListParams,
    ) -> Result<Page<Domain>, DomainError> {
        let count_row = sqlx::query(
            "SELECT COUNT(*) AS n \
             FROM domains AS d \
             JOIN user_domain_roles AS r ON r.domain_id = d.id \
             WHERE r.user_id = ?",
        )
        .bind(user_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        let total: i64 = count_row.get("n");
        let (page, num_pages, limit, offset) = paginate(total as u64, params.page, params.per_page);

        let query = format!(
            "SELECT d.id, d.name, d.state, d.expiration_date, d.first_ready_at, d.created_at, d.updated_at \
             FROM domains AS d \
             JOIN user_domain_roles AS r ON r.domain_id = d.id \
             WHERE r.user_id = ? \
             ORDER BY {} {}, d.id ASC \
             LIMIT ? OFFSET ?",
            params.sort.column(),
            params.order.as_sql(),
        );
        let rows = sqlx::query_as::<_, DomainRow>(&query)
            .bind(user_id.to_string())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            rows: rows
                .into_iter()
                .map(DomainRow::into_domain)
                .collect::<Result<_, _>>()?,
            total: total as u64,
            page,
            num_pages,
        })
    }

    /// Lists every domain ordered by name, for report generation.
    pub async fn list_all(&self) -> Result<Vec<Domain>, DomainError> {
        let rows =
            sqlx::query_as::<_, DomainRow>("SELECT * FROM domains ORDER BY name ASC, id ASC")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(DomainRow::into_domain)
            .collect::<Result<_, _>>()
            .map_err(Into::into)
    }
}

/// Errors raised by the domain repository.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("a live domain already uses the name {0}")]
    NameInUse(String),
    #[error("domain not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, sqlx::FromRow)]
struct DomainRow {
    id: String,
    name: String,
    state: String,
    expiration_date: Option<NaiveDate>,
    first_ready_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DomainRow {
    fn into_domain(self) -> Result<Domain, sqlx::Error> {
        Ok(Domain {
            id: parse_uuid("id", &self.id)?,
            name: self.name,
            state: DomainState::from_str(&self.state).unwrap_or(DomainState::Unknown),
            expiration_date: self.expiration_date,
            first_ready_at: self.first_ready_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Sort keys accepted by the domain-request listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestSortKey {
    #[default]
    CreatedAt,
    RequestedDomain,
    Status,
    LastSubmittedDate,
}

impl RequestSortKey {
    fn column(self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::RequestedDomain => "requested_domain",
            Self::Status => "status",
            Self::LastSubmittedDate => "last_submitted_date",
        }
    }
}

/// Pagination and sorting inputs for request listings.
#[derive(Debug, Clone, Copy)]
pub struct RequestListParams {
    pub sort: RequestSortKey,
    pub order: SortOrder,
    pub page: u32,
    pub per_page: u32,
}

/// Repository managing domain requests.
#[derive(Clone)]
pub struct DomainRequestRepository {
    pool: SqlitePool,
}

/// Data required to open a new domain request.
pub struct NewDomainRequest<'a> {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub requested_domain: Option<&'a str>,
    pub generic_org_type: Option<GenericOrgType>,
    pub is_election_board: Option<bool>,
    pub organization_type: Option<OrganizationType>,
    pub created_at: DateTime<Utc>,
}

impl DomainRequestRepository {
    /// Inserts a new request in the started status.
    pub async fn insert(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        record: &NewDomainRequest<'_>,
    ) -> Result<(), RequestError> {
        let stamp = to_rfc3339(record.created_at);
        sqlx::query(
            "INSERT INTO domain_requests \
             (id, creator_id, requested_domain, status, generic_org_type, is_election_board, \
              organization_type, created_at, updated_at) \
             VALUES (?, ?, ?, 'started', ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.creator_id.to_string())
        .bind(record.requested_domain)
        .bind(record.generic_org_type.map(GenericOrgType::as_str))
        .bind(record.is_election_board.map(i64::from))
        .bind(record.organization_type.map(OrganizationType::as_str))
        .bind(&stamp)
        .bind(&stamp)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Loads a request by id.
    pub async fn fetch(&self, id: Uuid) -> Result<Option<DomainRequest>, RequestError> {
        let row = sqlx::query_as::<_, RequestRow>("SELECT * FROM domain_requests WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(RequestRow::into_domain)
            .transpose()
            .map_err(Into::into)
    }

    /// Assigns an investigator to the request.
    pub async fn assign_investigator(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        request_id: Uuid,
        investigator_id: Option<Uuid>,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RequestError> {
        let result =
            sqlx::query("UPDATE domain_requests SET investigator_id = ?, updated_at = ? WHERE id = ?")
                .bind(investigator_id.map(|id| id.to_string()))
                .bind(to_rfc3339(updated_at))
                .bind(request_id.to_string())
                .execute(&mut **tx)
                .await?;

        if result.rows_affected() == 0 {
            return Err(RequestError::NotFound);
        }
        Ok(())
    }

    /// Persists the mutable fields of a request after a transition.
    pub async fn update(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        request: &DomainRequest,
        updated_at: DateTime<Utc>,
    ) -> Result<(), RequestError> {
        let result = sqlx::query(
            "UPDATE domain_requests SET \
             requested_domain = ?, status = ?, generic_org_type = ?, is_election_board = ?, \
             organization_type = ?, investigator_id = ?, rejection_reason = ?, \
             action_needed_reason = ?, first_submitted_date = ?, last_submitted_date = ?, \
             approved_domain_id = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(request.requested_domain.as_deref())
        .bind(request.status.as_str())
        .bind(request.generic_org_type.map(GenericOrgType::as_str))
        .bind(request.is_election_board.map(i64::from))
        .bind(request.organization_type.map(OrganizationType::as_str))
        .bind(request.investigator_id.map(|id| id.to_string()))
        .bind(request.rejection_reason.map(RejectionReason::as_str))
        .bind(request.action_needed_reason.map(ActionNeededReason::as_str))
        .bind(request.first_submitted_date)
        .bind(request.last_submitted_date)
        .bind(request.approved_domain_id.map(|id| id.to_string()))
        .bind(to_rfc3339(updated_at))
        .bind(request.id.to_string())
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RequestError::NotFound);
        }
        Ok(())
    }

    /// Lists requests created by a user.
    pub async fn list_for_creator(
        &self,
        creator_id: Uuid,
        params: &RequestListParams,
    ) -> Result<Page<DomainRequest>, RequestError> {
        let count_row =
            sqlx::query("SELECT COUNT(*) AS n FROM domain_requests WHERE creator_id = ?")
                .bind(creator_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        let total: i64 = count_row.get("n");
        let (page, num_pages, limit, offset) = paginate(total as u64, params.page, params.per_page);

        let query = format!(
            "SELECT * FROM domain_requests WHERE creator_id = ? \
             ORDER BY {} {}, id ASC LIMIT ? OFFSET ?",
            params.sort.column(),
            params.order.as_sql(),
        );
        let rows = sqlx::query_as::<_, RequestRow>(&query)
            .bind(creator_id.to_string())
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            rows: rows
                .into_iter()
                .map(RequestRow::into_domain)
                .collect::<Result<_, _>>()?,
            total: total as u64,
            page,
            num_pages,
        })
    }

    /// Lists every request, optionally narrowed to one status.
    pub async fn list_all(
        &self,
        status: Option<DomainRequestStatus>,
        params: &RequestListParams,
    ) -> Result<Page<DomainRequest>, RequestError> {
        let status_value = status.map(DomainRequestStatus::as_str);

        let count_row = match status_value {
            Some(value) => sqlx::query("SELECT COUNT(*) AS n FROM domain_requests WHERE status = ?")
                .bind(value)
                .fetch_one(&self.pool)
                .await?,
            None => {
                sqlx::query("SELECT COUNT(*) AS n FROM domain_requests")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        let total: i64 = count_row.get("n");
        let (page, num_pages, limit, offset) = paginate(total as u64, params.page, params.per_page);

        let filter = if status_value.is_some() {
            "WHERE status = ?"
        } else {
            ""
        };
        let query = format!(
            "SELECT * FROM domain_requests {} ORDER BY {} {}, id ASC LIMIT ? OFFSET ?",
            filter,
            params.sort.column(),
            params.order.as_sql(),
        );
        let mut builder = sqlx::query_as::<_, RequestRow>(&query);
        if let Some(value) = status_value {
            builder = builder.bind(value);
        }
        let rows = builder
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(Page {
            rows: rows
                .into_iter()
                .map(RequestRow::into_domain)
                .collect::<Result<_, _>>()?,
            total: total as u64,
            page,
            num_pages,
        })
    }

    /// Counts requests per status.
    pub async fn count_by_status(&self) -> Result<Vec<StatusCount>, RequestError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM domain_requests GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| StatusCount {
                status: row.get("status"),
                count: row.get("n"),
            })
            .collect())
    }
}

/// Number of requests sitting in one status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCount {
    pub status: String,
    pub count: i64,
}

/// Errors raised by the domain-request repository.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("domain request not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, sqlx::FromRow)]
struct RequestRow {
    id: String,
    creator_id: String,
    requested_domain: Option<String>,
    status: String,
    generic_org_type: Option<String>,
    is_election_board: Option<i64>,
    organization_type: Option<String>,
    investigator_id: Option<String>,
    rejection_reason: Option<String>,
    action_needed_reason: Option<String>,
    first_submitted_date: Option<NaiveDate>,
    last_submitted_date: Option<NaiveDate>,
    approved_domain_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl RequestRow {
    fn into_domain(self) -> Result<DomainRequest, sqlx::Error> {
        let investigator_id = self
            .investigator_id
            .as_deref()
            .map(|value| parse_uuid("investigator_id", value))
            .transpose()?;
        let approved_domain_id = self
            .approved_domain_id
            .as_deref()
            .map(|value| parse_uuid("approved_domain_id", value))
            .transpose()?;
        Ok(DomainRequest {
            id: parse_uuid("id", &self.id)?,
            creator_id: parse_uuid("creator_id", &self.creator_id)?,
            requested_domain: self.requested_domain,
            status: DomainRequestStatus::from_str(&self.status)
                .unwrap_or(DomainRequestStatus::Started),
            generic_org_type: self
                .generic_org_type
                .as_deref()
                .and_then(|value| GenericOrgType::from_str(value).ok()),
            is_election_board: self.is_election_board.map(|value| value != 0),
            organization_type: self
                .organization_type
                .as_deref()
                .and_then(|value| OrganizationType::from_str(value).ok()),
            investigator_id,
            rejection_reason: self
                .rejection_reason
                .as_deref()
                .and_then(|value| RejectionReason::from_str(value).ok()),
            action_needed_reason: self
                .action_needed_reason
                .as_deref()
                .and_then(|value| ActionNeededReason::from_str(value).ok()),
            first_submitted_date: self.first_submitted_date,
            last_submitted_date: self.last_submitted_date,
            approved_domain_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Repository granting users roles on domains.
#[derive(Clone)]
pub struct DomainRoleRepository {
    pool: SqlitePool,
}

impl DomainRoleRepository {
    /// Grants a role, ignoring a grant that already exists.
    pub async fn grant(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        user_id: Uuid,
        domain_id: Uuid,
        role: DomainRole,
        created_at: DateTime<Utc>,
    ) -> Result<(), RoleError> {
        sqlx::query(
            "INSERT INTO user_domain_roles (user_id, domain_id, role, created_at) \
             VALUES (?, ?, ?, ?) \
             ON CONFLICT (user_id, domain_id) DO NOTHING",
        )
        .bind(user_id.to_string())
        .bind(domain_id.to_string())
        .bind(role.as_str())
        .bind(to_rfc3339(created_at))
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Returns `true` when the user holds any role on the domain.
    pub async fn exists(&self, user_id: Uuid, domain_id: Uuid) -> Result<bool, RoleError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM user_domain_roles WHERE user_id = ? AND domain_id = ?",
        )
        .bind(user_id.to_string())
        .bind(domain_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = row.get("n");
        Ok(count > 0)
    }
}

/// Errors raised by the role repository.
#[derive(Debug, Error)]
pub enum RoleError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}
