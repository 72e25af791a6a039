use attractap_core::services::{
    CardStore, FirmwareCatalog, MaintenanceService, ReaderStore, UsageService, UserDirectory,
};

/// Collaborators a gateway needs, bundled behind one type parameter.
///
/// Connection tasks are generic over `S: Services` so that every state
/// handler is monomorphized against concrete repositories.
pub trait Services: Send + Sync + 'static {
    type Cards: CardStore;
    type Readers: ReaderStore;
    type Users: UserDirectory;
    type Usage: UsageService;
    type Maintenance: MaintenanceService;
    type Firmware: FirmwareCatalog;

    fn cards(&self) -> &Self::Cards;
    fn readers(&self) -> &Self::Readers;
    fn users(&self) -> &Self::Users;
    fn usage(&self) -> &Self::Usage;
    fn maintenance(&self) -> &Self::Maintenance;
    fn firmware(&self) -> &Self::Firmware;
}
