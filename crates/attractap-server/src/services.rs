use attractap_gateway::Services;
use attractap_storage::{
    Database, FsFirmwareCatalog, SqliteCardRepository, SqliteMaintenanceRepository,
    SqliteReaderRepository, SqliteUsageRepository, SqliteUserRepository,
};

/// Production collaborators: SQLite repositories and the firmware directory
#[derive(Debug)]
pub struct AppServices {
    cards: SqliteCardRepository,
    readers: SqliteReaderRepository,
    users: SqliteUserRepository,
    usage: SqliteUsageRepository,
    maintenance: SqliteMaintenanceRepository,
    firmware: FsFirmwareCatalog,
}

impl AppServices {
    pub fn new(db: &Database, firmware: FsFirmwareCatalog) -> Self {
        let pool = db.pool();
        Self {
            cards: SqliteCardRepository::new(pool.clone()),
            readers: SqliteReaderRepository::new(pool.clone()),
            users: SqliteUserRepository::new(pool.clone()),
            usage: SqliteUsageRepository::new(pool.clone()),
            maintenance: SqliteMaintenanceRepository::new(pool.clone()),
            firmware,
        }
    }
}

impl Services for AppServices {
    type Cards = SqliteCardRepository;
    type Readers = SqliteReaderRepository;
    type Users = SqliteUserRepository;
    type Usage = SqliteUsageRepository;
    type Maintenance = SqliteMaintenanceRepository;
    type Firmware = FsFirmwareCatalog;

    fn cards(&self) -> &Self::Cards {
        &self.cards
    }

    fn readers(&self) -> &Self::Readers {
        &self.readers
    }

    fn users(&self) -> &Self::Users {
        &self.users
    }

    fn usage(&self) -> &Self::Usage {
        &self.usage
    }

    fn maintenance(&self) -> &Self::Maintenance {
        &self.maintenance
    }

    fn firmware(&self) -> &Self::Firmware {
        &self.firmware
    }
}
