fn main() {
    routemq::app::startup::startup();
}
